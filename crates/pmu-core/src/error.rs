//! # PMU Error Handling
//!
//! Error types for the PMU transport stack.
//!
//! Error handling follows these principles:
//! - Errors are typed and `Copy`, so they cross lock and callback boundaries freely
//! - No panics in production code paths
//! - Protocol violations carry the reason, boot failures carry what was seen
//! - Errors are `no_std` compatible

use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// PMU Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// PMU unified error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Malformed command, payload descriptor or response buffer
    InvalidArgument,
    /// No free sequence slot, or the hardware mutex retry budget ran out
    Busy,
    /// Not enough room in the target queue
    QueueFull,
    /// Caller timeout or hardware poll timeout expired
    Timeout,
    /// DMEM allocator exhausted
    OutOfSpace,
    /// The engine has not received the init message yet
    NotReady,
    /// Either side broke the queue/mutex/sequence protocol
    ProtocolViolation(Violation),
    /// The boot handshake message was rejected
    HandshakeFailed(HandshakeError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::Busy => write!(f, "resource busy"),
            Self::QueueFull => write!(f, "queue full"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::OutOfSpace => write!(f, "out of DMEM space"),
            Self::NotReady => write!(f, "PMU not ready"),
            Self::ProtocolViolation(v) => write!(f, "protocol violation: {}", v),
            Self::HandshakeFailed(e) => write!(f, "handshake failed: {}", e),
        }
    }
}

// =============================================================================
// SUB-ERROR TYPES
// =============================================================================

/// Protocol violation reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// Queue opened while already open
    QueueAlreadyOpen,
    /// Queue accessed in the wrong direction or while closed
    QueueNotOpen,
    /// Mutex released by a token that does not own it
    NotMutexOwner,
    /// Response for a sequence that is not outstanding
    UnknownSequence(u8),
    /// Response larger than the caller's buffer
    ResponseTooLarge,
    /// Frame carries a unit id outside the valid range
    InvalidUnit(u8),
    /// Fewer bytes available than the frame declares
    ShortRead,
    /// Freed range was not (fully) allocated
    UnallocatedFree,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueAlreadyOpen => write!(f, "queue already open"),
            Self::QueueNotOpen => write!(f, "queue not open for this operation"),
            Self::NotMutexOwner => write!(f, "mutex not owned by requester"),
            Self::UnknownSequence(id) => write!(f, "message for unknown sequence {}", id),
            Self::ResponseTooLarge => write!(f, "response larger than buffer"),
            Self::InvalidUnit(id) => write!(f, "invalid unit id 0x{:02x}", id),
            Self::ShortRead => write!(f, "short read"),
            Self::UnallocatedFree => write!(f, "free of unallocated range"),
        }
    }
}

/// Boot handshake failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    /// First message was not addressed to the init unit
    UnexpectedUnit(u8),
    /// Init unit message with the wrong sub-type
    UnexpectedType(u8),
    /// Message too short to hold the init payload
    Truncated,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedUnit(id) => write!(f, "expected init unit, got 0x{:02x}", id),
            Self::UnexpectedType(ty) => write!(f, "expected init message, got type {}", ty),
            Self::Truncated => write!(f, "init message truncated"),
        }
    }
}

// =============================================================================
// ERROR CONVERSION
// =============================================================================

impl From<Violation> for Error {
    fn from(v: Violation) -> Self {
        Error::ProtocolViolation(v)
    }
}

impl From<HandshakeError> for Error {
    fn from(e: HandshakeError) -> Self {
        Error::HandshakeFailed(e)
    }
}
