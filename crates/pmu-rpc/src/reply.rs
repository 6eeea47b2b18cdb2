//! # Completion Reporting
//!
//! What a posted command's callback receives.

use alloc::boxed::Box;
use alloc::vec::Vec;

use pmu_core::Descriptor;

use crate::frame::FrameHeader;

/// Completion handler; caller context travels in the closure
pub type Callback = Box<dyn FnOnce(Reply) + Send>;

/// How a command completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Reply delivered (and copied when a response buffer was supplied)
    Success,
    /// The PMU reported the command as unhandled
    Unhandled,
    /// Reply arrived but the response buffer was too small for it
    ResponseDropped,
    /// The engine shut down before a reply arrived
    Aborted,
}

/// A completed command
#[derive(Debug)]
pub struct Reply {
    /// Descriptor returned by `post`
    pub descriptor: Descriptor,
    /// Completion status
    pub status: CompletionStatus,
    /// Received header, PMU private flags masked off
    pub header: FrameHeader,
    /// Received frame, header included (empty when aborted)
    pub frame: Vec<u8>,
    /// The caller's response buffer, filled on success
    pub response: Option<Vec<u8>>,
    /// The caller's output payload buffer, filled from DMEM on success
    pub output: Option<Vec<u8>>,
}

impl Reply {
    /// Body of the received frame
    pub fn body(&self) -> &[u8] {
        self.frame.get(core::mem::size_of::<FrameHeader>()..).unwrap_or(&[])
    }
}
