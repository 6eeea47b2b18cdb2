//! # PMU RPC Protocol
//!
//! Command/message transport between the host and the falcon PMU.
//!
//! ## Architecture
//!
//! The PMU shares a DMEM region with the host. Commands travel through
//! ring buffers the firmware describes at boot; replies come back through a
//! single message ring and are announced by an interrupt.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         PmuEngine                            │
//! │                                                              │
//! │  post() ──▶ SequenceTable ──▶ DmemAllocator ──▶ QueueManager │
//! │               (slot, cb)       (payloads)        (cmd rings) │
//! │                                                     │        │
//! │  on_interrupt() ──▶ WorkScheduler ──▶ drain() ◀─────┘        │
//! │                                         │      (message ring)│
//! │                                         ▼                    │
//! │                                   callback(Reply)            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Message Flow
//!
//! 1. The caller posts a command; a sequence slot is reserved
//! 2. Out-of-band payloads are staged in DMEM blocks
//! 3. The framed command is written into a command ring and published
//! 4. The PMU replies on the message ring and raises `SWGEN0`
//! 5. The drain worker matches the reply to its slot by sequence id,
//!    copies results back, fires the callback and frees the slot

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod config;
pub mod dvfs;
pub mod engine;
pub mod frame;
pub mod queue;
pub mod reply;
pub mod seq;

// Re-exports
pub use config::EngineConfig;
pub use dvfs::{DvfsConfig, DvfsGovernor, LoadSample, PerfStates};
pub use engine::{EngineState, EngineStats, PmuEngine};
pub use frame::{Command, CtrlFlags, FrameHeader, Payload, PayloadRegion, HDR_SIZE};
pub use queue::{Direction, QueueGeometry, QueueHandle, QueueManager};
pub use reply::{Callback, CompletionStatus, Reply};
pub use seq::{SequenceTable, SlotState};
