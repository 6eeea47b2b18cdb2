//! # PMU Hardware Abstraction Layer
//!
//! Everything that touches falcon registers lives here.
//!
//! Register access itself is not implemented by this crate: the platform
//! injects a [`RegisterIo`] capability (and a [`Clock`] for bounded waits),
//! so the layers above can be driven by a simulator in tests. Deferred work
//! is likewise injected through [`WorkScheduler`].
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        pmu-hal                           │
//! │                                                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────┐   │
//! │  │    Falcon    │  │  MutexArbiter│  │   IRQ bits /  │   │
//! │  │ (rd/wr/poll, │  │ (hw mutexes, │  │ enable/disable│   │
//! │  │  DMEM port)  │  │  ref counts) │  │               │   │
//! │  └──────┬───────┘  └──────────────┘  └───────────────┘   │
//! │         │                                                │
//! │  ┌──────┴───────────────────────────────────────────┐    │
//! │  │        RegisterIo + Clock (platform supplied)    │    │
//! │  └──────────────────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────┘
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod falcon;
pub mod io;
pub mod irq;
pub mod mutex;
pub mod regs;

// Re-exports
pub use falcon::Falcon;
pub use io::{Clock, RegisterIo, WorkScheduler};
pub use irq::FalconIrq;
pub use mutex::MutexArbiter;
