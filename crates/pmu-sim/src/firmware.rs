//! # Simulated Firmware
//!
//! The PMU side of the queue protocol, encoded independently of the host
//! crates so the tests check the wire format rather than mirror it.
//!
//! - [`SimFalcon::boot`] writes the init message at the message queue base
//!   and raises the message interrupt.
//! - [`SimFalcon::take_commands`] drains a command queue: it consumes
//!   frames from the tail up to the host-published head and follows rewind
//!   markers.
//! - [`SimFalcon::post_message`] appends a reply, rewinding first when it
//!   would not fit before the end of the ring.

use alloc::vec::Vec;

use pmu_core::{align_up, QUEUE_COUNT};
use pmu_hal::{regs, FalconIrq};

use crate::falcon::SimState;
use crate::SimFalcon;

/// Frame header size
pub const HDR_SIZE: u32 = 8;

/// Init unit id
const UNIT_INIT: u8 = 0x07;
/// RC unit id
const UNIT_RC: u8 = 0x1f;
/// Rewind marker unit id
const UNIT_REWIND: u8 = 0x00;
/// Message queue id
const MESSAGE_QUEUE: usize = 4;

// =============================================================================
// LAYOUT
// =============================================================================

/// Geometry of one queue as reported in the init message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLayout {
    /// DMEM offset of the ring
    pub offset: u16,
    /// Ring size in bytes
    pub size: u16,
    /// Hardware head/tail register index
    pub index: u8,
}

/// Everything the init message reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitLayout {
    /// Queues in id order: HPQ, LPQ, two hardware queues, message queue
    pub queues: [QueueLayout; QUEUE_COUNT],
    /// Software managed DMEM area offset
    pub dmem_offset: u16,
    /// Software managed DMEM area size
    pub dmem_size: u16,
}

impl InitLayout {
    /// Ring end of queue `id`
    pub fn queue_end(&self, id: usize) -> u32 {
        let q = self.queues[id];
        q.offset as u32 + q.size as u32
    }

    fn encode(&self, unit_id: u8, msg_type: u8) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(46);
        bytes.extend_from_slice(&[unit_id, 0]);
        bytes.extend_from_slice(&46u16.to_le_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 0]);

        bytes.extend_from_slice(&[msg_type, 0]);
        bytes.extend_from_slice(&0u16.to_le_bytes());
        for q in &self.queues {
            bytes.extend_from_slice(&q.size.to_le_bytes());
            bytes.extend_from_slice(&q.offset.to_le_bytes());
            bytes.extend_from_slice(&[q.index, 0]);
        }
        bytes.extend_from_slice(&self.dmem_offset.to_le_bytes());
        bytes.extend_from_slice(&self.dmem_size.to_le_bytes());
        bytes
    }
}

impl Default for InitLayout {
    fn default() -> Self {
        Self {
            queues: [
                QueueLayout { offset: 0x1000, size: 0x200, index: 0 },
                QueueLayout { offset: 0x1200, size: 0x200, index: 1 },
                QueueLayout { offset: 0x1400, size: 0x200, index: 2 },
                QueueLayout { offset: 0x1600, size: 0x200, index: 3 },
                QueueLayout { offset: 0x1800, size: 0x400, index: 0 },
            ],
            dmem_offset: 0x4000,
            dmem_size: 0x2000,
        }
    }
}

// =============================================================================
// FRAMES
// =============================================================================

/// A frame as the firmware sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimFrame {
    /// Target unit
    pub unit_id: u8,
    /// Control flags
    pub ctrl_flags: u8,
    /// Declared frame size
    pub size: u16,
    /// Sequence id
    pub seq_id: u8,
    /// The whole frame, header included
    pub bytes: Vec<u8>,
}

impl SimFrame {
    fn decode(bytes: Vec<u8>) -> Self {
        Self {
            unit_id: bytes[0],
            ctrl_flags: bytes[1],
            size: u16::from_le_bytes([bytes[2], bytes[3]]),
            seq_id: bytes[4],
            bytes,
        }
    }

    /// Bytes after the header
    pub fn body(&self) -> &[u8] {
        self.bytes.get(HDR_SIZE as usize..).unwrap_or(&[])
    }

    /// Payload allocation record at body offset `at`: `(size, dmem offset)`
    pub fn payload_alloc(&self, at: usize) -> Option<(u16, u32)> {
        let rec = self.body().get(at..at + 8)?;
        Some((
            u16::from_le_bytes([rec[0], rec[1]]),
            u32::from_le_bytes([rec[4], rec[5], rec[6], rec[7]]),
        ))
    }
}

fn header(unit_id: u8, ctrl_flags: u8, size: u16, seq_id: u8) -> [u8; 8] {
    let size = size.to_le_bytes();
    [unit_id, ctrl_flags, size[0], size[1], seq_id, 0, 0, 0]
}

fn write_bytes(state: &mut SimState, offset: u32, bytes: &[u8]) {
    let at = offset as usize;
    if let Some(dst) = state.dmem.get_mut(at..at + bytes.len()) {
        dst.copy_from_slice(bytes);
    }
}

fn read_bytes(state: &SimState, offset: u32, len: usize) -> Vec<u8> {
    let at = offset as usize;
    state.dmem.get(at..at + len).map(<[u8]>::to_vec).unwrap_or_default()
}

// =============================================================================
// FIRMWARE
// =============================================================================

impl SimFalcon {
    /// Boot: publish the init message and raise the message interrupt
    pub fn boot(&self, layout: &InitLayout) {
        self.boot_with(layout, UNIT_INIT, 0);
    }

    /// Boot with an arbitrary unit id and sub-type on the init message
    pub fn boot_with(&self, layout: &InitLayout, unit_id: u8, msg_type: u8) {
        let mut state = self.state.lock();
        let msgq = layout.queues[MESSAGE_QUEUE];
        let init = layout.encode(unit_id, msg_type);

        write_bytes(&mut state, msgq.offset as u32, &init);
        state.regs.insert(regs::MSGQ_TAIL, msgq.offset as u32);
        state.regs.insert(
            regs::MSGQ_HEAD,
            msgq.offset as u32 + align_up(init.len() as u32, 4),
        );

        for q in &layout.queues[..MESSAGE_QUEUE] {
            state.regs.insert(regs::queue_head(q.index as u32), q.offset as u32);
            state.regs.insert(regs::queue_tail(q.index as u32), q.offset as u32);
        }

        state.layout = Some(*layout);
        state.raise(FalconIrq::SWGEN0.bits());
    }

    /// Consume every command the host has published on queue `id`
    pub fn take_commands(&self, id: usize) -> Vec<SimFrame> {
        let mut state = self.state.lock();
        let mut frames = Vec::new();
        let Some(layout) = state.layout else {
            return frames;
        };
        let q = layout.queues[id];
        let head = state.reg(regs::queue_head(q.index as u32));
        let mut tail = state.reg(regs::queue_tail(q.index as u32));

        while tail != head {
            let hdr = read_bytes(&state, tail, HDR_SIZE as usize);
            if hdr.len() != HDR_SIZE as usize {
                break;
            }
            if hdr[0] == UNIT_REWIND {
                tail = q.offset as u32;
                continue;
            }
            let size = u16::from_le_bytes([hdr[2], hdr[3]]) as u32;
            if size < HDR_SIZE {
                break;
            }
            let bytes = read_bytes(&state, tail, size as usize);
            if bytes.len() != size as usize {
                break;
            }
            frames.push(SimFrame::decode(bytes));
            tail += align_up(size, 4);
        }

        state.regs.insert(regs::queue_tail(q.index as u32), tail);
        frames
    }

    /// Append a reply to the message queue and raise the message interrupt
    ///
    /// The host is expected to keep the queue drained; there is no overflow
    /// check against the tail.
    pub fn post_message(&self, unit_id: u8, ctrl_flags: u8, seq_id: u8, body: &[u8]) {
        let mut state = self.state.lock();
        let Some(layout) = state.layout else {
            return;
        };
        let q = layout.queues[MESSAGE_QUEUE];
        let end = layout.queue_end(MESSAGE_QUEUE);

        let size = HDR_SIZE + body.len() as u32;
        let aligned = align_up(size, 4);
        let mut head = state.reg(regs::MSGQ_HEAD);

        if head + aligned > end - HDR_SIZE {
            let marker = header(UNIT_REWIND, 0, HDR_SIZE as u16, 0);
            write_bytes(&mut state, head, &marker);
            head = q.offset as u32;
        }

        let mut frame = Vec::with_capacity(size as usize);
        frame.extend_from_slice(&header(unit_id, ctrl_flags, size as u16, seq_id));
        frame.extend_from_slice(body);
        write_bytes(&mut state, head, &frame);

        state.regs.insert(regs::MSGQ_HEAD, head + aligned);
        state.raise(FalconIrq::SWGEN0.bits());
    }

    /// Reply to `cmd` on the same unit and sequence
    pub fn reply(&self, cmd: &SimFrame, body: &[u8]) {
        self.post_message(cmd.unit_id, 0, cmd.seq_id, body);
    }

    /// Report `cmd` as unhandled through the RC unit
    pub fn reject(&self, cmd: &SimFrame) {
        self.post_message(UNIT_RC, 0, cmd.seq_id, &[0, 0, 0, 0]);
    }
}
