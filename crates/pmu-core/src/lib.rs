//! # PMU Core
//!
//! Foundational types for the falcon PMU transport.
//!
//! Nothing in this crate touches hardware. It provides:
//! - The unified [`Error`] type shared by every layer
//! - Strongly typed identifiers (queues, units, sequences, descriptors)
//! - Fixed and growable occupancy bitmaps used by the sequence table and
//!   the DMEM allocator
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       pmu-core                              │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │   Error     │  │   Types     │  │      Bitmaps        │  │
//! │  │ (Violation, │  │ (QueueId,   │  │ (FixedBitmap,       │  │
//! │  │  Handshake) │  │  UnitId)    │  │  Bitmap)            │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(test)]
extern crate std;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod bitmap;
pub mod error;
pub mod types;

// Re-exports for convenience
pub use bitmap::{Bitmap, FixedBitmap};
pub use error::{Error, HandshakeError, Result, Violation};
pub use types::*;

/// Round `value` up to the next multiple of `align` (a power of two)
#[inline]
pub const fn align_up(value: u32, align: u32) -> u32 {
    let mask = align - 1;
    (value + mask) & !mask
}
