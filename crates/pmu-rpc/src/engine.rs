//! # Protocol Engine
//!
//! The host side of the PMU command/message protocol.
//!
//! ## Lifecycle
//!
//! ```text
//!          init()               init message           shutdown()
//!   Off ──────────▶ Starting ──────────────▶ InitReceived ──────────▶ Off
//!                       │
//!                       │ bad init message
//!                       ▼
//!                     Error
//! ```
//!
//! ## Contexts
//!
//! - Caller threads run [`PmuEngine::post`] and [`PmuEngine::cancel`].
//! - The interrupt handler runs [`PmuEngine::on_interrupt`]; it only
//!   acknowledges, logs and schedules the drain worker.
//! - The single drain worker runs [`PmuEngine::drain`], serialised with
//!   teardown by `isr_lock`.
//!
//! The interrupt handler never takes `isr_lock`, so it cannot wait behind a
//! drain that is running callbacks. `irq_lock` only orders it against the
//! handler being switched on and off.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use pmu_core::{
    align_up, Descriptor, Error, HandshakeError, QueueId, QueueKind, Result, SeqId, UnitId,
    Violation, SEQ_COUNT,
};
use pmu_hal::irq::{self, FalconIrq};
use pmu_hal::{regs, Falcon, MutexArbiter, WorkScheduler};
use pmu_mem::{DmemAllocator, DmemBlock, DmemStats};
use spin::Mutex;

use crate::config::EngineConfig;
use crate::frame::{
    Command, CtrlFlags, FrameHeader, InitMsg, Payload, PayloadAlloc, PayloadRegion, HDR_SIZE,
    INIT_BODY_SIZE, INIT_MSG_TYPE_PMU_INIT, PAYLOAD_ALLOC_SIZE, RC_MSG_TYPE_UNHANDLED_CMD,
};
use crate::queue::{QueueHandle, QueueManager, QUEUE_ALIGNMENT};
use crate::reply::{Callback, CompletionStatus, Reply};
use crate::seq::{Completion, SequenceTable, SlotState};

// =============================================================================
// STATE
// =============================================================================

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    /// Powered off
    Off = 0,
    /// Enabled, waiting for the init message
    Starting = 1,
    /// Handshake done, commands accepted
    InitReceived = 2,
    /// Handshake failed
    Error = 3,
}

impl EngineState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Starting,
            2 => Self::InitReceived,
            3 => Self::Error,
            _ => Self::Off,
        }
    }
}

/// Snapshot of the engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Commands written to a queue
    pub posted: u64,
    /// Responses matched to a slot
    pub dispatched: u64,
    /// Callbacks suppressed by cancellation
    pub suppressed: u64,
    /// Messages for a slot with nothing outstanding
    pub stale: u64,
    /// Responses larger than the caller's buffer
    pub dropped_responses: u64,
    /// Messages with an invalid unit id
    pub invalid_frames: u64,
    /// `open_write` attempts that found the queue full
    pub queue_full_retries: u64,
    /// Queue rewinds
    pub rewinds: u64,
    /// Sequence slots reserved
    pub slots_in_use: usize,
    /// Payload allocator counters, once the allocator exists
    pub dmem: Option<DmemStats>,
}

#[derive(Debug, Default)]
struct Counters {
    posted: AtomicU64,
    dispatched: AtomicU64,
    suppressed: AtomicU64,
    stale: AtomicU64,
    dropped_responses: AtomicU64,
    invalid_frames: AtomicU64,
    queue_full_retries: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// What one read from the message queue produced
enum Inbound {
    Message(FrameHeader, Vec<u8>),
    Dropped,
    Empty,
}

// =============================================================================
// ENGINE
// =============================================================================

/// PMU protocol engine
pub struct PmuEngine {
    falcon: Falcon,
    scheduler: Box<dyn WorkScheduler>,
    config: EngineConfig,
    queues: QueueManager,
    seq: SequenceTable,
    dmem: Mutex<Option<DmemAllocator>>,
    state: AtomicU8,
    ready: AtomicBool,
    isr_enabled: AtomicBool,
    isr_lock: Mutex<()>,
    irq_lock: Mutex<()>,
    next_desc: AtomicU32,
    counters: Counters,
}

impl fmt::Debug for PmuEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PmuEngine")
            .field("state", &self.state())
            .field("ready", &self.is_ready())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PmuEngine {
    /// Engine over `falcon`, drained by the worker behind `scheduler`
    pub fn new(
        falcon: Falcon,
        scheduler: impl WorkScheduler + 'static,
        config: EngineConfig,
    ) -> Self {
        Self {
            falcon,
            scheduler: Box::new(scheduler),
            queues: QueueManager::new(MutexArbiter::new(
                config.mutex_retries,
                config.mutex_retry_delay_us,
            )),
            config,
            seq: SequenceTable::new(),
            dmem: Mutex::new(None),
            state: AtomicU8::new(EngineState::Off as u8),
            ready: AtomicBool::new(false),
            isr_enabled: AtomicBool::new(false),
            isr_lock: Mutex::new(()),
            irq_lock: Mutex::new(()),
            next_desc: AtomicU32::new(0),
            counters: Counters::default(),
        }
    }

    /// Lifecycle state
    pub fn state(&self) -> EngineState {
        EngineState::from_raw(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Handshake completed
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// The falcon this engine drives
    #[inline]
    pub fn falcon(&self) -> &Falcon {
        &self.falcon
    }

    /// The protocol queues
    #[inline]
    pub fn queues(&self) -> &QueueManager {
        &self.queues
    }

    /// Lifecycle state of sequence slot `seq`
    pub fn slot_state(&self, seq: SeqId) -> SlotState {
        self.seq.state(seq)
    }

    /// Counter snapshot
    pub fn stats(&self) -> EngineStats {
        let c = &self.counters;
        EngineStats {
            posted: c.posted.load(Ordering::Relaxed),
            dispatched: c.dispatched.load(Ordering::Relaxed),
            suppressed: c.suppressed.load(Ordering::Relaxed),
            stale: c.stale.load(Ordering::Relaxed),
            dropped_responses: c.dropped_responses.load(Ordering::Relaxed),
            invalid_frames: c.invalid_frames.load(Ordering::Relaxed),
            queue_full_retries: c.queue_full_retries.load(Ordering::Relaxed),
            rewinds: self.queues.rewinds(),
            slots_in_use: self.seq.in_use(),
            dmem: self.dmem.lock().as_ref().map(DmemAllocator::stats),
        }
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Enable the falcon and its interrupts
    ///
    /// Firmware loading is external; the engine becomes ready once
    /// [`drain`](Self::drain) consumes the init message.
    pub fn init(&self) -> Result<()> {
        let _isr = self.isr_lock.lock();
        self.set_state(EngineState::Starting);

        if let Err(err) = self.enable_hw() {
            self.set_state(EngineState::Off);
            return Err(err);
        }

        if let Err(err) = self.falcon.poll32(
            regs::IDLESTATE,
            regs::IDLESTATE_BUSY,
            0,
            self.config.idle_timeout_us,
            self.config.poll_interval_us,
        ) {
            log::error!("timeout waiting for pmu idle: {:?}", err);
            self.disable_hw();
            self.set_state(EngineState::Off);
            return Err(Error::Busy);
        }

        {
            let _irq = self.irq_lock.lock();
            irq::enable(&self.falcon);
            self.isr_enabled.store(true, Ordering::Release);
        }
        log::debug!("pmu enabled, waiting for init message");
        Ok(())
    }

    fn enable_hw(&self) -> Result<()> {
        self.falcon
            .mask32(regs::pmc::ENABLE, regs::pmc::ENABLE_PMU, regs::pmc::ENABLE_PMU);
        self.falcon.read32(regs::pmc::ENABLE);

        if let Err(err) = self.falcon.poll32(
            regs::DMACTL,
            regs::DMACTL_SCRUBBING,
            0,
            self.config.scrub_timeout_us,
            self.config.poll_interval_us,
        ) {
            log::error!("falcon imem/dmem scrub timeout");
            self.disable_hw();
            return Err(err);
        }

        Ok(())
    }

    fn disable_hw(&self) {
        self.falcon.mask32(regs::pmc::ENABLE, regs::pmc::ENABLE_PMU, 0);
    }

    /// Tear the engine down
    ///
    /// Interrupts go first, then the drain worker, then the master enable.
    /// Every reserved slot is force-released; an outstanding command's
    /// callback fires with [`CompletionStatus::Aborted`].
    pub fn shutdown(&self) {
        {
            let _irq = self.irq_lock.lock();
            self.isr_enabled.store(false, Ordering::Release);
            irq::disable(&self.falcon);
        }
        self.scheduler.cancel_sync();

        let _isr = self.isr_lock.lock();

        if self.falcon.read32(regs::pmc::ENABLE) & regs::pmc::ENABLE_PMU != 0 {
            self.disable_hw();
        }

        self.set_state(EngineState::Off);
        self.ready.store(false, Ordering::Release);
        irq::mask(&self.falcon, FalconIrq::SWGEN0 | FalconIrq::EXTERR);

        for index in 0..SEQ_COUNT {
            let seq = SeqId(index as u8);
            let Some(done) = self.seq.reclaim(seq) else {
                continue;
            };
            self.free_blocks(done.input_block, done.output_block);
            if done.state == SlotState::Used {
                if let Some(callback) = done.callback {
                    callback(Reply {
                        descriptor: done.descriptor,
                        status: CompletionStatus::Aborted,
                        header: FrameHeader::default(),
                        frame: Vec::new(),
                        response: done.response,
                        output: done.output,
                    });
                }
            }
            self.seq.release(seq);
        }

        if let Some(dmem) = self.dmem.lock().take() {
            dmem.destroy();
        }
        self.queues.reset();
        log::debug!("pmu shut down");
    }

    // =========================================================================
    // INTERRUPTS
    // =========================================================================

    /// Interrupt entry point
    ///
    /// Only acknowledges and schedules; never waits for a running drain.
    pub fn on_interrupt(&self) {
        let _irq = self.irq_lock.lock();
        if !self.isr_enabled.load(Ordering::Acquire) {
            return;
        }

        let intr = irq::pending(&self.falcon);
        log::trace!("received falcon interrupt: {:?}", intr);
        irq::disable(&self.falcon);

        if intr.is_empty() || self.state() == EngineState::Off {
            irq::ack(&self.falcon, intr);
            irq::enable(&self.falcon);
            return;
        }

        if intr.contains(FalconIrq::HALT) {
            log::error!("pmu halted");
        }
        if intr.contains(FalconIrq::EXTERR) {
            log::error!("pmu external error");
            irq::clear_exterr(&self.falcon);
        }
        if intr.contains(FalconIrq::SWGEN0) {
            self.scheduler.schedule();
            irq::enable(&self.falcon);
        }

        irq::ack(&self.falcon, intr);
    }

    // =========================================================================
    // MESSAGE DRAIN
    // =========================================================================

    /// Deferred worker: consume the init message or dispatch replies
    ///
    /// Re-enables interrupts on exit.
    pub fn drain(&self) -> Result<()> {
        if self.state() == EngineState::Off {
            return Err(Error::NotReady);
        }

        let result = {
            let _isr = self.isr_lock.lock();
            if self.is_ready() {
                self.process_messages()
            } else {
                self.process_init()
            }
        };

        irq::enable(&self.falcon);
        result
    }

    fn process_init(&self) -> Result<()> {
        if let Err(err) = self.read_init() {
            log::error!("pmu init handshake failed: {:?}", err);
            self.set_state(EngineState::Error);
            return Err(err);
        }

        self.ready.store(true, Ordering::Release);
        self.set_state(EngineState::InitReceived);
        log::debug!("pmu init message processed");
        Ok(())
    }

    fn read_init(&self) -> Result<()> {
        let tail = self.falcon.read32(regs::MSGQ_TAIL);

        let mut hdr = [0u8; HDR_SIZE as usize];
        self.falcon.copy_from_dmem(tail, &mut hdr)?;
        let header = FrameHeader::from_bytes(&hdr).ok_or(HandshakeError::Truncated)?;
        if header.unit() != UnitId::INIT {
            log::error!("expecting init msg, got unit {:?}", header.unit());
            return Err(HandshakeError::UnexpectedUnit(header.unit_id).into());
        }
        if (header.size as usize) < HDR_SIZE as usize + INIT_BODY_SIZE {
            return Err(HandshakeError::Truncated.into());
        }

        let mut body = [0u8; INIT_BODY_SIZE];
        self.falcon.copy_from_dmem(tail + HDR_SIZE, &mut body)?;
        let init = InitMsg::from_bytes(&body).ok_or(HandshakeError::Truncated)?;
        if init.msg_type != INIT_MSG_TYPE_PMU_INIT {
            log::error!("expecting init msg, got type {}", init.msg_type);
            return Err(HandshakeError::UnexpectedType(init.msg_type).into());
        }

        self.falcon
            .write32(regs::MSGQ_TAIL, tail + align_up(header.size as u32, QUEUE_ALIGNMENT));

        for (id, geometry) in QueueId::all().zip(init.queue_geometry()) {
            self.queues.configure(id, geometry);
        }

        let offset = init.sw_managed_area_offset as u32;
        let size = init.sw_managed_area_size as u32;
        log::debug!("dmem area: offset 0x{:x}, size 0x{:x}", offset, size);
        *self.dmem.lock() = Some(DmemAllocator::new(offset, size));
        Ok(())
    }

    fn process_messages(&self) -> Result<()> {
        loop {
            match self.read_message()? {
                Inbound::Message(header, frame) => self.dispatch(header, frame),
                Inbound::Dropped => bump(&self.counters.invalid_frames),
                Inbound::Empty => return Ok(()),
            }
        }
    }

    fn read_message(&self) -> Result<Inbound> {
        let id = QueueId::MESSAGE;
        if self.queues.is_empty(&self.falcon, id)? {
            return Ok(Inbound::Empty);
        }

        let mut queue = self.queues.open_read(&self.falcon, id)?;

        let mut hdr = [0u8; HDR_SIZE as usize];
        Self::pop_exact(&mut queue, &mut hdr)?;
        let mut header = FrameHeader::from_bytes(&hdr).ok_or(Violation::ShortRead)?;

        if header.unit().is_rewind() {
            queue.rewind()?;
            if queue.is_empty()? {
                queue.close(true)?;
                return Ok(Inbound::Empty);
            }
            Self::pop_exact(&mut queue, &mut hdr)?;
            header = FrameHeader::from_bytes(&hdr).ok_or(Violation::ShortRead)?;
        }

        let body_len = (header.size as usize).saturating_sub(HDR_SIZE as usize);

        if !header.unit().is_valid() || (header.size as u32) < HDR_SIZE {
            log::error!(
                "queue {}: {} (size {})",
                id,
                Violation::InvalidUnit(header.unit_id),
                header.size
            );
            if body_len > 0 {
                let mut skip = vec![0u8; body_len];
                // what is there is skipped either way
                let _ = queue.pop(&mut skip)?;
            }
            queue.close(true)?;
            return Ok(Inbound::Dropped);
        }

        let mut frame = vec![0u8; HDR_SIZE as usize + body_len];
        frame[..HDR_SIZE as usize].copy_from_slice(&hdr);
        if body_len > 0 {
            Self::pop_exact(&mut queue, &mut frame[HDR_SIZE as usize..])?;
        }

        queue.close(true)?;
        Ok(Inbound::Message(header, frame))
    }

    /// Short reads leave the handle to be dropped, which closes it without
    /// committing
    fn pop_exact(queue: &mut QueueHandle<'_>, buf: &mut [u8]) -> Result<()> {
        let read = queue.pop(buf)?;
        if read != buf.len() {
            log::error!(
                "fail to read msg from queue {}: {} of {} bytes",
                queue.id(),
                read,
                buf.len()
            );
            return Err(Violation::ShortRead.into());
        }
        Ok(())
    }

    fn dispatch(&self, mut header: FrameHeader, mut frame: Vec<u8>) {
        header.ctrl_flags &= !CtrlFlags::PMU_PRIVATE.bits();
        frame[1] = header.ctrl_flags;

        let seq = SeqId(header.seq_id);
        let Some(done) = self.seq.complete(seq) else {
            log::error!("{}", Violation::UnknownSequence(seq.0));
            bump(&self.counters.stale);
            return;
        };

        let Completion {
            state,
            descriptor,
            callback,
            mut response,
            mut output,
            input_block,
            output_block,
        } = done;
        let cancelled = state == SlotState::Cancelled;
        let mut status = CompletionStatus::Success;

        if header.unit() == UnitId::RC
            && frame.get(HDR_SIZE as usize) == Some(&RC_MSG_TYPE_UNHANDLED_CMD)
        {
            log::error!("unhandled cmd: seq {}", seq.0);
            status = CompletionStatus::Unhandled;
        } else if !cancelled {
            if let Some(buf) = response.as_mut() {
                if buf.len() >= frame.len() {
                    buf[..frame.len()].copy_from_slice(&frame);
                    if let (Some(block), Some(out)) = (output_block, output.as_mut()) {
                        self.copy_output(block, out);
                    }
                } else {
                    log::error!(
                        "sequence {}: {} ({} > {})",
                        seq.0,
                        Violation::ResponseTooLarge,
                        frame.len(),
                        buf.len()
                    );
                    status = CompletionStatus::ResponseDropped;
                    bump(&self.counters.dropped_responses);
                }
            }
        }

        self.free_blocks(input_block, output_block);

        if cancelled {
            bump(&self.counters.suppressed);
        } else if let Some(callback) = callback {
            callback(Reply {
                descriptor,
                status,
                header,
                frame,
                response,
                output,
            });
        }

        self.seq.release(seq);
        bump(&self.counters.dispatched);
    }

    fn copy_output(&self, block: DmemBlock, out: &mut [u8]) {
        let len = (block.requested as usize).min(out.len());
        if len == 0 {
            return;
        }
        if let Err(err) = self.falcon.copy_from_dmem(block.offset, &mut out[..len]) {
            log::error!("output payload copy from 0x{:x} failed: {:?}", block.offset, err);
        }
    }

    fn free_blocks(&self, input: Option<DmemBlock>, output: Option<DmemBlock>) {
        if input.is_none() && output.is_none() {
            return;
        }
        let mut dmem = self.dmem.lock();
        let Some(allocator) = dmem.as_mut() else {
            return;
        };
        for block in [input, output].into_iter().flatten() {
            // logged by the allocator
            let _ = allocator.free(block);
        }
    }

    // =========================================================================
    // POSTING
    // =========================================================================

    /// Post `command` to software command queue `queue`
    ///
    /// `response` receives a copy of the reply frame; `payload` stages
    /// out-of-band data in DMEM. `callback` runs on the drain worker with the
    /// reply. Blocks up to `timeout_ms` while the queue is full.
    ///
    /// If writing the frame fails, the slot is left Pending with its payload
    /// blocks and the error is returned.
    pub fn post(
        &self,
        mut command: Command,
        response: Option<Vec<u8>>,
        payload: Option<Payload>,
        queue: QueueId,
        callback: Option<Callback>,
        timeout_ms: u64,
    ) -> Result<Descriptor> {
        if !self.is_ready() {
            log::warn!("pmu is not ready");
            return Err(Error::NotReady);
        }

        if !self.check_cmd_params(&command, response.as_deref(), payload.as_ref(), queue) {
            log::error!(
                "invalid pmu cmd: queue {}, unit {:?}, size {}",
                queue,
                command.header.unit(),
                command.header.size
            );
            return Err(Error::InvalidArgument);
        }

        let seq = self.seq.acquire()?;
        command.header.seq_id = seq.0;
        command.header.ctrl_flags = (CtrlFlags::STATUS | CtrlFlags::INTR).bits();
        let descriptor = Descriptor(self.next_desc.fetch_add(1, Ordering::Relaxed));

        let (input_block, output_block, output) = match self.stage_payload(&mut command, payload) {
            Ok(staged) => staged,
            Err(err) => {
                self.seq.release(seq);
                return Err(err);
            }
        };

        self.seq.with_slot(seq, |slot| {
            slot.descriptor = Some(descriptor);
            slot.callback = callback;
            slot.response = response;
            slot.output = output;
            slot.input_block = input_block;
            slot.output_block = output_block;
            slot.state = SlotState::Used;
        });

        if let Err(err) = self.write_command(&command, queue, timeout_ms) {
            log::error!("failed to post pmu cmd to queue {}: {:?}", queue, err);
            self.seq.with_slot(seq, |slot| slot.state = SlotState::Pending);
            return Err(err);
        }

        bump(&self.counters.posted);
        log::debug!("cmd posted: seq {}, {:?}", seq.0, descriptor);
        Ok(descriptor)
    }

    fn check_cmd_params(
        &self,
        command: &Command,
        response: Option<&[u8]>,
        payload: Option<&Payload>,
        queue: QueueId,
    ) -> bool {
        if queue.kind() != QueueKind::SoftwareCommand {
            return false;
        }
        let Some(geometry) = self.queues.geometry(queue) else {
            return false;
        };

        let size = command.header.size as u32;
        if size < HDR_SIZE || size > geometry.size / 2 {
            return false;
        }
        if size as usize != HDR_SIZE as usize + command.body.len() {
            return false;
        }
        if response.is_some_and(|buf| buf.len() < HDR_SIZE as usize) {
            return false;
        }
        if !command.header.unit().is_valid() {
            return false;
        }

        let Some(payload) = payload else {
            return true;
        };
        if payload.input.buf.is_none() && payload.output.buf.is_none() {
            return false;
        }

        Self::region_fits(&payload.input, size) && Self::region_fits(&payload.output, size)
    }

    fn region_fits(region: &PayloadRegion, cmd_size: u32) -> bool {
        match &region.buf {
            Some(buf) => {
                let end = HDR_SIZE
                    .checked_add(region.offset)
                    .and_then(|at| at.checked_add(PAYLOAD_ALLOC_SIZE));
                region.size != 0
                    && buf.len() >= region.size as usize
                    && end.is_some_and(|end| end <= cmd_size)
            }
            None => region.offset == 0,
        }
    }

    /// Allocate and stamp payload blocks; returns them with the output
    /// buffer to keep on the slot
    fn stage_payload(
        &self,
        command: &mut Command,
        payload: Option<Payload>,
    ) -> Result<(Option<DmemBlock>, Option<DmemBlock>, Option<Vec<u8>>)> {
        let Some(payload) = payload else {
            return Ok((None, None, None));
        };

        let mut dmem = self.dmem.lock();
        let allocator = dmem.as_mut().ok_or(Error::NotReady)?;
        let align = self.config.payload_alignment;

        let mut input_block = None;
        if payload.input.offset != 0 {
            let region = &payload.input;
            let block = allocator.alloc(region.size as u32, align, None)?;
            input_block = Some(block);

            let staged = Self::stamp(command, region, block).and_then(|()| {
                let bytes = region.buf.as_deref().unwrap_or(&[]);
                self.falcon.copy_to_dmem(block.offset, &bytes[..region.size as usize])
            });
            if let Err(err) = staged {
                // the block was just allocated
                let _ = allocator.free(block);
                return Err(err);
            }
        }

        let mut output_block = None;
        if payload.output.offset != 0 {
            let region = &payload.output;
            let staged = allocator
                .alloc(region.size as u32, align, None)
                .and_then(|block| match Self::stamp(command, region, block) {
                    Ok(()) => Ok(block),
                    Err(err) => {
                        let _ = allocator.free(block);
                        Err(err)
                    }
                });
            match staged {
                Ok(block) => output_block = Some(block),
                Err(err) => {
                    if let Some(block) = input_block {
                        let _ = allocator.free(block);
                    }
                    return Err(err);
                }
            }
        }

        Ok((input_block, output_block, payload.output.buf))
    }

    fn stamp(command: &mut Command, region: &PayloadRegion, block: DmemBlock) -> Result<()> {
        let record = PayloadAlloc {
            size: region.size,
            pad: 0,
            offset: block.offset,
        };
        let at = region.offset as usize;
        let dst = command
            .body
            .get_mut(at..at + PAYLOAD_ALLOC_SIZE as usize)
            .ok_or(Error::InvalidArgument)?;
        dst.copy_from_slice(bytemuck::bytes_of(&record));
        Ok(())
    }

    fn write_command(&self, command: &Command, queue: QueueId, timeout_ms: u64) -> Result<()> {
        let size = command.header.size as u32;
        let deadline = self
            .falcon
            .now_us()
            .saturating_add(timeout_ms.saturating_mul(1000));

        let mut handle = loop {
            match self.queues.open_write(&self.falcon, queue, size) {
                Ok(handle) => break handle,
                Err(Error::QueueFull) if self.falcon.now_us() < deadline => {
                    bump(&self.counters.queue_full_retries);
                    self.falcon.delay_us(self.config.post_retry_delay_us);
                }
                Err(Error::QueueFull) => return Err(Error::Timeout),
                Err(err) => return Err(err),
            }
        };

        // a failed push drops the handle, closing without commit
        handle.push(command.header.as_bytes())?;
        if !command.body.is_empty() {
            handle.push(&command.body)?;
        }
        handle.close(true)
    }

    /// Lose interest in an outstanding command
    ///
    /// Its reply still reclaims the slot and payload blocks, but the
    /// callback does not run.
    pub fn cancel(&self, descriptor: Descriptor) -> Result<()> {
        let seq = self.seq.find(descriptor).ok_or(Error::InvalidArgument)?;
        self.seq.with_slot(seq, |slot| match slot.state {
            SlotState::Used if slot.descriptor == Some(descriptor) => {
                slot.state = SlotState::Cancelled;
                Ok(())
            }
            _ => Err(Error::InvalidArgument),
        })
    }
}

impl Drop for PmuEngine {
    fn drop(&mut self) {
        if self.state() != EngineState::Off {
            self.shutdown();
        }
    }
}
