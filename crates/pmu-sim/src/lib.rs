//! # PMU Simulator
//!
//! A software falcon for exercising the transport without hardware.
//!
//! The simulator plays both roles the real chip plays:
//!
//! - **Register file** ([`SimFalcon`]): DMEM behind the auto-increment copy
//!   port, the mutex bank with its owner-id generator, interrupt
//!   status/mask registers and plain storage for everything else.
//! - **Firmware** ([`firmware`]): writes the boot handshake message, drains
//!   command queues the way the PMU does, and posts replies into the
//!   message queue.
//!
//! [`SimClock`] and [`RecordingScheduler`] stand in for the remaining
//! platform capabilities.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod falcon;
pub mod firmware;
pub mod platform;

// Re-exports
pub use falcon::SimFalcon;
pub use firmware::{InitLayout, QueueLayout, SimFrame};
pub use platform::{RecordingScheduler, SimClock};

/// DMEM size of the simulated falcon (the full DMEMC address range)
pub const SIM_DMEM_SIZE: usize = 0x1_0000;
