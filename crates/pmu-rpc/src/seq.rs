//! # Sequence Table
//!
//! Outstanding-command slots, indexed by the sequence id echoed in replies.
//!
//! ```text
//!            acquire            frame written
//!   Free ───────────▶ Pending ───────────────▶ Used ───────┐
//!    ▲                   │                      │ cancel    │ reply
//!    │     release       │ (write failed:       ▼           │
//!    └───────────────────┤  stays Pending)   Cancelled ─────┤
//!    └──────────────────────────────────────────────────────┘
//! ```
//!
//! Occupancy is a bitmap behind its own lock; each slot has its own lock
//! so `post` and the drain worker only contend on the slot they share.

use alloc::vec::Vec;
use core::fmt;

use pmu_core::{Descriptor, Error, FixedBitmap, Result, SeqId, SEQ_COUNT};
use pmu_mem::DmemBlock;
use spin::Mutex;

use crate::reply::Callback;

const SEQ_WORDS: usize = SEQ_COUNT / 64;

/// Slot lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SlotState {
    /// Not in use
    #[default]
    Free,
    /// Reserved, frame not (successfully) written
    Pending,
    /// Frame written, waiting for the reply
    Used,
    /// Caller lost interest; reply reclaims resources without a callback
    Cancelled,
}

/// Per-command bookkeeping
#[derive(Default)]
pub(crate) struct Slot {
    pub(crate) state: SlotState,
    pub(crate) descriptor: Option<Descriptor>,
    pub(crate) callback: Option<Callback>,
    pub(crate) response: Option<Vec<u8>>,
    pub(crate) output: Option<Vec<u8>>,
    pub(crate) input_block: Option<DmemBlock>,
    pub(crate) output_block: Option<DmemBlock>,
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("state", &self.state)
            .field("descriptor", &self.descriptor)
            .field("callback", &self.callback.is_some())
            .field("input_block", &self.input_block)
            .field("output_block", &self.output_block)
            .finish_non_exhaustive()
    }
}

/// Everything moved out of a slot when its command completes
pub(crate) struct Completion {
    pub(crate) state: SlotState,
    pub(crate) descriptor: Descriptor,
    pub(crate) callback: Option<Callback>,
    pub(crate) response: Option<Vec<u8>>,
    pub(crate) output: Option<Vec<u8>>,
    pub(crate) input_block: Option<DmemBlock>,
    pub(crate) output_block: Option<DmemBlock>,
}

impl Slot {
    fn take(&mut self) -> Completion {
        Completion {
            state: self.state,
            descriptor: self.descriptor.take().unwrap_or(Descriptor(u32::MAX)),
            callback: self.callback.take(),
            response: self.response.take(),
            output: self.output.take(),
            input_block: self.input_block.take(),
            output_block: self.output_block.take(),
        }
    }
}

/// Fixed table of [`SEQ_COUNT`] slots
#[derive(Debug)]
pub struct SequenceTable {
    occupancy: Mutex<FixedBitmap<SEQ_WORDS>>,
    slots: Vec<Mutex<Slot>>,
}

impl SequenceTable {
    /// Table with every slot free
    pub fn new() -> Self {
        Self {
            occupancy: Mutex::new(FixedBitmap::new()),
            slots: (0..SEQ_COUNT).map(|_| Mutex::new(Slot::default())).collect(),
        }
    }

    /// Reserve the lowest free slot and mark it Pending
    pub fn acquire(&self) -> Result<SeqId> {
        let index = {
            let mut occupancy = self.occupancy.lock();
            let Some(index) = occupancy.first_zero() else {
                log::error!("no free sequence available");
                return Err(Error::Busy);
            };
            occupancy.set(index);
            index
        };

        self.slots[index].lock().state = SlotState::Pending;
        log::debug!("seq id acquired: {}", index);
        Ok(SeqId(index as u8))
    }

    /// Reset a slot and make it available again
    pub fn release(&self, id: SeqId) {
        *self.slots[id.index()].lock() = Slot::default();

        let mut occupancy = self.occupancy.lock();
        if !occupancy.test(id.index()) {
            log::warn!("seq {} released twice", id.0);
        }
        occupancy.clear(id.index());
        log::debug!("seq released: {}", id.0);
    }

    /// Lifecycle state of a slot
    pub fn state(&self, id: SeqId) -> SlotState {
        self.slots[id.index()].lock().state
    }

    /// Number of reserved slots
    pub fn in_use(&self) -> usize {
        self.occupancy.lock().count()
    }

    /// Slot currently tagged with `descriptor`
    pub fn find(&self, descriptor: Descriptor) -> Option<SeqId> {
        self.slots
            .iter()
            .position(|slot| slot.lock().descriptor == Some(descriptor))
            .map(|index| SeqId(index as u8))
    }

    pub(crate) fn with_slot<R>(&self, id: SeqId, f: impl FnOnce(&mut Slot) -> R) -> R {
        f(&mut self.slots[id.index()].lock())
    }

    /// Move a reply's bookkeeping out of a Used or Cancelled slot
    ///
    /// The slot keeps its state (and occupancy) until [`release`](Self::release).
    pub(crate) fn complete(&self, id: SeqId) -> Option<Completion> {
        self.with_slot(id, |slot| {
            matches!(slot.state, SlotState::Used | SlotState::Cancelled).then(|| slot.take())
        })
    }

    /// Move bookkeeping out of any reserved slot (teardown)
    pub(crate) fn reclaim(&self, id: SeqId) -> Option<Completion> {
        self.with_slot(id, |slot| (slot.state != SlotState::Free).then(|| slot.take()))
    }
}

impl Default for SequenceTable {
    fn default() -> Self {
        Self::new()
    }
}
