//! # PMU Memory Management
//!
//! Allocation of the software-managed DMEM area the PMU reports at boot.
//!
//! Commands that carry more data than fits in a frame stage it here: the
//! host copies the input bytes into a block, stamps the block's offset into
//! the frame, and the PMU reads (or writes back) the block directly.
//!
//! ```text
//! sw_managed_area_offset                       + sw_managed_area_size
//! ┌──────────┬──────┬──────────┬──────────────────────────────────┐
//! │ block A  │ free │ block B  │              free                │
//! └──────────┴──────┴──────────┴──────────────────────────────────┘
//!  one bit per 4-byte unit, first fit, 32-byte aligned payloads
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod dmem;

// Re-exports
pub use dmem::{DmemAllocator, DmemBlock, DmemStats, DMEM_UNIT, PAYLOAD_ALIGNMENT};
