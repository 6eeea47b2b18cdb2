//! # Wire Frames
//!
//! Every command and message starts with an 8-byte header:
//!
//! ```text
//!  0        1           2         4        5            8
//! ┌────────┬───────────┬─────────┬────────┬────────────┐
//! │unit_id │ctrl_flags │  size   │ seq_id │  reserved  │  body...
//! └────────┴───────────┴─────────┴────────┴────────────┘
//! ```
//!
//! `size` covers the header. Payload allocation records and the init
//! message body use fixed little-endian layouts read with `bytemuck`.

use alloc::vec::Vec;
use core::mem::size_of;

use arrayvec::ArrayVec;
use bytemuck::{Pod, Zeroable};
use pmu_core::{Error, Result, UnitId, QUEUE_COUNT};
use static_assertions::const_assert_eq;

use crate::queue::QueueGeometry;

#[cfg(target_endian = "big")]
compile_error!("PMU wire structs are little-endian");

/// Header size of commands and messages
pub const HDR_SIZE: u32 = 8;

/// Init message sub-type carrying the queue layout
pub const INIT_MSG_TYPE_PMU_INIT: u8 = 0;

/// RC message sub-type reporting a command the PMU could not handle
pub const RC_MSG_TYPE_UNHANDLED_CMD: u8 = 0;

// =============================================================================
// HEADER
// =============================================================================

bitflags::bitflags! {
    /// Frame control flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CtrlFlags: u8 {
        /// Request a status reply
        const STATUS = 1 << 0;
        /// Raise an interrupt on completion
        const INTR = 1 << 1;
        /// Unsolicited event
        const EVENT = 1 << 2;
        /// Watermark
        const WATERMARK = 1 << 3;
        /// Bits reserved for the PMU, masked off received messages
        const PMU_PRIVATE = 0xF0;
    }
}

/// Frame header
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct FrameHeader {
    /// Target unit
    pub unit_id: u8,
    /// Raw [`CtrlFlags`]
    pub ctrl_flags: u8,
    /// Frame size including this header
    pub size: u16,
    /// Sequence slot the reply is matched against
    pub seq_id: u8,
    /// Reserved
    pub reserved: [u8; 3],
}

const_assert_eq!(size_of::<FrameHeader>(), HDR_SIZE as usize);

impl FrameHeader {
    /// Header for a frame of `size` bytes addressed to `unit`
    pub const fn new(unit: UnitId, size: u16) -> Self {
        Self {
            unit_id: unit.0,
            ctrl_flags: 0,
            size,
            seq_id: 0,
            reserved: [0; 3],
        }
    }

    /// Rewind marker
    pub const fn rewind() -> Self {
        Self::new(UnitId::REWIND, HDR_SIZE as u16)
    }

    /// Decode from the first [`HDR_SIZE`] bytes of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes
            .get(..HDR_SIZE as usize)
            .map(bytemuck::pod_read_unaligned)
    }

    /// Encoded bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Target unit
    #[inline]
    pub const fn unit(&self) -> UnitId {
        UnitId(self.unit_id)
    }

    /// Control flags
    #[inline]
    pub const fn flags(&self) -> CtrlFlags {
        CtrlFlags::from_bits_retain(self.ctrl_flags)
    }
}

// =============================================================================
// PAYLOAD ALLOCATION RECORD
// =============================================================================

/// DMEM block descriptor stamped into a command body
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PayloadAlloc {
    /// Payload size in bytes
    pub size: u16,
    /// Padding
    pub pad: u16,
    /// DMEM offset of the block
    pub offset: u32,
}

/// Size of [`PayloadAlloc`] on the wire
pub const PAYLOAD_ALLOC_SIZE: u32 = 8;

const_assert_eq!(size_of::<PayloadAlloc>(), PAYLOAD_ALLOC_SIZE as usize);

// =============================================================================
// INIT MESSAGE
// =============================================================================

/// Queue record inside the init message
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct QueueInfo {
    /// Ring size in bytes
    pub size: u16,
    /// DMEM offset of the ring
    pub offset: u16,
    /// Head/tail register index
    pub index: u8,
    /// Padding
    pub pad: u8,
}

/// Init message body (after the header)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct InitMsg {
    /// Sub-type, [`INIT_MSG_TYPE_PMU_INIT`]
    pub msg_type: u8,
    /// Padding
    pub pad: u8,
    /// Firmware debug entry point
    pub os_debug_entry_point: u16,
    /// Queue layout in queue id order
    pub queue_info: [QueueInfo; QUEUE_COUNT],
    /// Start of the software managed DMEM area
    pub sw_managed_area_offset: u16,
    /// Size of the software managed DMEM area
    pub sw_managed_area_size: u16,
}

/// Size of the init message body
pub const INIT_BODY_SIZE: usize = 38;

const_assert_eq!(size_of::<QueueInfo>(), 6);
const_assert_eq!(size_of::<InitMsg>(), INIT_BODY_SIZE);

impl InitMsg {
    /// Decode from a body of at least [`INIT_BODY_SIZE`] bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.get(..INIT_BODY_SIZE).map(bytemuck::pod_read_unaligned)
    }

    /// Queue geometry in queue id order
    pub fn queue_geometry(&self) -> ArrayVec<QueueGeometry, QUEUE_COUNT> {
        self.queue_info
            .iter()
            .map(|info| QueueGeometry {
                index: info.index,
                offset: info.offset as u32,
                size: info.size as u32,
            })
            .collect()
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

/// A command ready to post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Header; `seq_id` and `ctrl_flags` are stamped by the engine
    pub header: FrameHeader,
    /// Unit specific body
    pub body: Vec<u8>,
}

impl Command {
    /// Command to `unit` carrying `body`
    pub fn new(unit: UnitId, body: Vec<u8>) -> Result<Self> {
        let size = u16::try_from(HDR_SIZE as usize + body.len())
            .map_err(|_| Error::InvalidArgument)?;
        Ok(Self {
            header: FrameHeader::new(unit, size),
            body,
        })
    }

    /// Header followed by body
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HDR_SIZE as usize + self.body.len());
        bytes.extend_from_slice(self.header.as_bytes());
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// One direction of an out-of-band payload
///
/// `offset` is where the [`PayloadAlloc`] record goes, counted from the
/// end of the header. Zero means the region is not staged in DMEM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadRegion {
    /// Input bytes, or the buffer the output is copied back into
    pub buf: Option<Vec<u8>>,
    /// Record offset in the body
    pub offset: u32,
    /// Payload size
    pub size: u16,
}

impl PayloadRegion {
    /// Region staged at body offset `offset`
    ///
    /// Fails with [`Error::InvalidArgument`] when `buf` is longer than a
    /// payload size field can describe.
    pub fn staged(buf: Vec<u8>, offset: u32) -> Result<Self> {
        let size = u16::try_from(buf.len()).map_err(|_| Error::InvalidArgument)?;
        Ok(Self {
            buf: Some(buf),
            offset,
            size,
        })
    }
}

/// Out-of-band payload of a command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    /// Host to PMU
    pub input: PayloadRegion,
    /// PMU to host
    pub output: PayloadRegion,
}
