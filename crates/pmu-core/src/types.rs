//! # PMU Core Types
//!
//! Identifier newtypes used across the transport.
//!
//! These types keep the different small integers of the protocol apart:
//! a queue id is never confused with a hardware queue index, a sequence
//! id with a descriptor, or a unit id with a message sub-type.

use core::fmt;

// =============================================================================
// QUEUES
// =============================================================================

/// Number of queues described by the init message
pub const QUEUE_COUNT: usize = 5;

/// Logical queue identifier (0..QUEUE_COUNT)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct QueueId(u8);

impl QueueId {
    /// High priority command queue (software arbitrated)
    pub const HPQ: Self = Self(0);
    /// Low priority command queue (software arbitrated)
    pub const LPQ: Self = Self(1);
    /// First hardware-arbitrated command queue
    pub const HW0: Self = Self(2);
    /// Second hardware-arbitrated command queue
    pub const HW1: Self = Self(3);
    /// Message (reply) queue, written by the PMU
    pub const MESSAGE: Self = Self(4);

    /// Create a queue id, rejecting out-of-range values
    pub const fn new(id: u8) -> Option<Self> {
        if (id as usize) < QUEUE_COUNT {
            Some(Self(id))
        } else {
            None
        }
    }

    /// Get the raw value
    #[inline]
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Index into per-queue tables
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// How access to this queue is arbitrated
    pub const fn kind(self) -> QueueKind {
        match self.0 {
            0 | 1 => QueueKind::SoftwareCommand,
            4 => QueueKind::Message,
            _ => QueueKind::HardwareCommand,
        }
    }

    /// Is this a host-to-PMU command queue?
    pub const fn is_command(self) -> bool {
        !matches!(self.kind(), QueueKind::Message)
    }

    /// Iterate over every queue id
    pub fn all() -> impl Iterator<Item = QueueId> {
        (0..QUEUE_COUNT as u8).map(QueueId)
    }
}

impl fmt::Debug for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueueId({})", self.0)
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Queue arbitration class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Command queue guarded by an in-process lock only
    SoftwareCommand,
    /// Command queue guarded by a hardware mutex
    HardwareCommand,
    /// Single-writer/single-reader reply queue, no lock
    Message,
}

// =============================================================================
// UNITS
// =============================================================================

/// Target unit identifier carried in every frame header
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct UnitId(pub u8);

impl UnitId {
    /// Rewind marker: the reader must jump back to the queue base
    pub const REWIND: Self = Self(0x00);
    /// Power gating
    pub const PG: Self = Self(0x03);
    /// Boot handshake
    pub const INIT: Self = Self(0x07);
    /// Performance monitor
    pub const PERFMON: Self = Self(0x12);
    /// Thermal
    pub const THERM: Self = Self(0x1B);
    /// Reset/recovery reports
    pub const RC: Self = Self(0x1F);
    /// Null unit
    pub const NULL: Self = Self(0x20);
    /// First id past the regular range
    pub const END: Self = Self(0x23);
    /// Start of the test range
    pub const TEST_START: Self = Self(0xFE);
    /// End of the test range
    pub const TEST_END: Self = Self(0xFF);

    /// Regular units and the test range are valid
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 < Self::END.0 || self.0 >= Self::TEST_START.0
    }

    /// Is this the rewind marker?
    #[inline]
    pub const fn is_rewind(self) -> bool {
        self.0 == Self::REWIND.0
    }
}

impl fmt::Debug for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitId(0x{:02x})", self.0)
    }
}

// =============================================================================
// SEQUENCES
// =============================================================================

/// Number of sequence slots
pub const SEQ_COUNT: usize = 256;

/// Sequence slot identifier, echoed back by the PMU in the response header
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SeqId(pub u8);

impl SeqId {
    /// Index into the slot table
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Caller-visible command descriptor, monotonically increasing per engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Descriptor(pub u32);

// =============================================================================
// MUTEX TOKENS
// =============================================================================

/// Hardware mutex owner token
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct MutexToken(pub u32);

impl MutexToken {
    /// Token that owns nothing
    pub const INVALID: Self = Self(0);

    /// Does this token name a possible owner?
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for MutexToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MutexToken(0x{:02x})", self.0)
    }
}
