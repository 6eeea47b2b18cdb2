//! # Queue Manager
//!
//! Ring buffers in falcon DMEM, described by the init message.
//!
//! ```text
//!   offset                                                   offset + size
//!   ┌──────────────┬───────────────────────────┬──────────────┐
//!   │   consumed   │   published, unconsumed   │     free     │
//!   └──────────────┴───────────────────────────┴──────────────┘
//!                  ▲ tail (consumer)            ▲ head (producer)
//! ```
//!
//! A writer that would not fit between `head` and the end of the ring
//! (keeping room for one header) drops a REWIND frame and continues at
//! `offset`. Readers follow REWIND frames back to `offset`.
//!
//! Opening a queue yields a [`QueueHandle`] that owns the queue until it is
//! closed. Closing with `commit` publishes the new position to the head
//! register (writer) or tail register (reader).

use core::sync::atomic::{AtomicU64, Ordering};

use pmu_core::{align_up, Error, MutexToken, QueueId, QueueKind, Result, Violation, QUEUE_COUNT};
use pmu_hal::{regs, Falcon, MutexArbiter};
use spin::{Mutex, MutexGuard};

use crate::frame::{FrameHeader, HDR_SIZE};

/// Queue positions advance in words
pub const QUEUE_ALIGNMENT: u32 = 4;

// =============================================================================
// GEOMETRY
// =============================================================================

/// Placement of a ring in DMEM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueGeometry {
    /// Head/tail register index (command queues)
    pub index: u8,
    /// DMEM offset of the ring
    pub offset: u32,
    /// Ring size in bytes
    pub size: u32,
}

impl QueueGeometry {
    /// First byte past the ring
    #[inline]
    pub const fn end(&self) -> u32 {
        self.offset + self.size
    }
}

/// Open mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Consumer side: advances the tail
    Read,
    /// Producer side: advances the head
    Write,
}

/// Whether `size` bytes fit at `head`, and whether the writer must rewind
/// first
fn room(geometry: &QueueGeometry, head: u32, tail: u32, size: u32) -> (bool, bool) {
    let size = align_up(size, QUEUE_ALIGNMENT);
    let mut head = head;
    let mut free = 0;
    let mut rewind = false;

    if head >= tail {
        free = geometry.end().saturating_sub(head).saturating_sub(HDR_SIZE);
        if size > free {
            rewind = true;
            head = geometry.offset;
        }
    }

    if head < tail {
        free = tail - head - 1;
    }

    (size <= free, rewind)
}

// =============================================================================
// MANAGER
// =============================================================================

#[derive(Debug, Default)]
struct QueueState {
    geometry: Option<QueueGeometry>,
    token: MutexToken,
}

/// The five protocol queues and their arbitration
#[derive(Debug)]
pub struct QueueManager {
    queues: [Mutex<QueueState>; QUEUE_COUNT],
    arbiter: MutexArbiter,
    rewinds: AtomicU64,
}

impl QueueManager {
    /// Manager with no geometry; hardware queues arbitrate through `arbiter`
    pub fn new(arbiter: MutexArbiter) -> Self {
        Self {
            queues: core::array::from_fn(|_| Mutex::new(QueueState::default())),
            arbiter,
            rewinds: AtomicU64::new(0),
        }
    }

    /// Install the geometry reported for queue `id`
    pub fn configure(&self, id: QueueId, geometry: QueueGeometry) {
        log::debug!(
            "queue {}: index {}, offset 0x{:x}, size 0x{:x}",
            id,
            geometry.index,
            geometry.offset,
            geometry.size
        );
        self.queues[id.index()].lock().geometry = Some(geometry);
    }

    /// Forget every queue's geometry
    pub fn reset(&self) {
        for queue in &self.queues {
            *queue.lock() = QueueState::default();
        }
    }

    /// Geometry of queue `id`, once configured
    pub fn geometry(&self, id: QueueId) -> Option<QueueGeometry> {
        self.queues[id.index()].lock().geometry
    }

    /// The hardware mutex arbiter
    pub fn arbiter(&self) -> &MutexArbiter {
        &self.arbiter
    }

    /// Rewinds performed by readers and writers
    pub fn rewinds(&self) -> u64 {
        self.rewinds.load(Ordering::Relaxed)
    }

    fn head_reg(id: QueueId, geometry: &QueueGeometry) -> Result<u32> {
        match id.kind() {
            QueueKind::Message => Ok(regs::MSGQ_HEAD),
            _ if (geometry.index as u32) < regs::CMD_QUEUE_REGS => {
                Ok(regs::queue_head(geometry.index as u32))
            }
            _ => Err(Error::InvalidArgument),
        }
    }

    fn tail_reg(id: QueueId, geometry: &QueueGeometry) -> Result<u32> {
        match id.kind() {
            QueueKind::Message => Ok(regs::MSGQ_TAIL),
            _ if (geometry.index as u32) < regs::CMD_QUEUE_REGS => {
                Ok(regs::queue_tail(geometry.index as u32))
            }
            _ => Err(Error::InvalidArgument),
        }
    }

    fn configured(&self, id: QueueId) -> Result<QueueGeometry> {
        self.geometry(id).ok_or(Error::NotReady)
    }

    /// Current head register of queue `id`
    pub fn head(&self, falcon: &Falcon, id: QueueId) -> Result<u32> {
        let geometry = self.configured(id)?;
        Ok(falcon.read32(Self::head_reg(id, &geometry)?))
    }

    /// Current tail register of queue `id`
    pub fn tail(&self, falcon: &Falcon, id: QueueId) -> Result<u32> {
        let geometry = self.configured(id)?;
        Ok(falcon.read32(Self::tail_reg(id, &geometry)?))
    }

    /// Nothing published beyond what has been consumed
    pub fn is_empty(&self, falcon: &Falcon, id: QueueId) -> Result<bool> {
        Ok(self.head(falcon, id)? == self.tail(falcon, id)?)
    }

    /// `(fits, needs_rewind)` for a `size` byte write to queue `id`
    pub fn has_room(&self, falcon: &Falcon, id: QueueId, size: u32) -> Result<(bool, bool)> {
        let geometry = self.configured(id)?;
        let head = falcon.read32(Self::head_reg(id, &geometry)?);
        let tail = falcon.read32(Self::tail_reg(id, &geometry)?);
        Ok(room(&geometry, head, tail, size))
    }

    fn lock<'q>(&'q self, falcon: &'q Falcon, id: QueueId) -> Result<MutexGuard<'q, QueueState>> {
        let queue = &self.queues[id.index()];
        let mut guard = match id.kind() {
            // single reader, never waits
            QueueKind::Message => queue.try_lock().ok_or(Violation::QueueAlreadyOpen)?,
            _ => queue.lock(),
        };

        if guard.geometry.is_none() {
            return Err(Error::NotReady);
        }

        if id.kind() == QueueKind::HardwareCommand {
            let token = self.arbiter.acquire(falcon, id.raw() as u32, guard.token)?;
            guard.token = token;
        }

        Ok(guard)
    }

    fn unlock_hw(&self, falcon: &Falcon, id: QueueId, state: &mut QueueState) -> Result<()> {
        if id.kind() != QueueKind::HardwareCommand {
            return Ok(());
        }
        let token = core::mem::take(&mut state.token);
        self.arbiter.release(falcon, id.raw() as u32, token)
    }

    /// Open queue `id` for reading at its tail
    pub fn open_read<'q>(&'q self, falcon: &'q Falcon, id: QueueId) -> Result<QueueHandle<'q>> {
        let guard = self.lock(falcon, id)?;
        let geometry = guard.geometry.ok_or(Error::NotReady)?;
        let position = match Self::tail_reg(id, &geometry) {
            Ok(reg) => falcon.read32(reg),
            Err(err) => return Err(self.abandon(falcon, id, guard, err)),
        };

        Ok(QueueHandle {
            manager: self,
            falcon,
            id,
            guard,
            geometry,
            direction: Direction::Read,
            position,
            closed: false,
        })
    }

    /// Open command queue `id` for writing `size` bytes at its head
    ///
    /// Fails with [`Error::QueueFull`] when the frame does not fit. When it
    /// only fits after wrapping, a REWIND frame is written first and the
    /// handle starts at the ring base.
    pub fn open_write<'q>(
        &'q self,
        falcon: &'q Falcon,
        id: QueueId,
        size: u32,
    ) -> Result<QueueHandle<'q>> {
        if !id.is_command() {
            return Err(Error::InvalidArgument);
        }

        let guard = self.lock(falcon, id)?;
        let geometry = guard.geometry.ok_or(Error::NotReady)?;
        let regs = (Self::head_reg(id, &geometry), Self::tail_reg(id, &geometry));
        let (head_reg, tail_reg) = match regs {
            (Ok(head), Ok(tail)) => (head, tail),
            (Err(err), _) | (_, Err(err)) => return Err(self.abandon(falcon, id, guard, err)),
        };

        let head = falcon.read32(head_reg);
        let tail = falcon.read32(tail_reg);
        let (fits, rewind) = room(&geometry, head, tail, size);
        if !fits {
            log::debug!("queue {} full: head 0x{:x}, tail 0x{:x}", id, head, tail);
            return Err(self.abandon(falcon, id, guard, Error::QueueFull));
        }

        let mut handle = QueueHandle {
            manager: self,
            falcon,
            id,
            guard,
            geometry,
            direction: Direction::Write,
            position: head,
            closed: false,
        };

        if rewind {
            handle.rewind()?;
        }

        Ok(handle)
    }

    fn abandon(
        &self,
        falcon: &Falcon,
        id: QueueId,
        mut guard: MutexGuard<'_, QueueState>,
        err: Error,
    ) -> Error {
        if let Err(release) = self.unlock_hw(falcon, id, &mut guard) {
            log::error!("queue {}: mutex release failed: {:?}", id, release);
        }
        err
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// An open queue
///
/// Dropping a handle without [`close`](Self::close) closes it without
/// committing.
pub struct QueueHandle<'q> {
    manager: &'q QueueManager,
    falcon: &'q Falcon,
    id: QueueId,
    guard: MutexGuard<'q, QueueState>,
    geometry: QueueGeometry,
    direction: Direction,
    position: u32,
    closed: bool,
}

impl core::fmt::Debug for QueueHandle<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueueHandle")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl QueueHandle<'_> {
    /// Queue this handle owns
    #[inline]
    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Open mode
    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Tracked read/write position
    #[inline]
    pub fn position(&self) -> u32 {
        self.position
    }

    /// Ring placement
    #[inline]
    pub fn geometry(&self) -> QueueGeometry {
        self.geometry
    }

    fn head(&self) -> Result<u32> {
        Ok(self
            .falcon
            .read32(QueueManager::head_reg(self.id, &self.geometry)?))
    }

    fn tail(&self) -> Result<u32> {
        Ok(self
            .falcon
            .read32(QueueManager::tail_reg(self.id, &self.geometry)?))
    }

    /// Reader has caught up with the producer
    pub fn is_empty(&self) -> Result<bool> {
        match self.direction {
            Direction::Read => Ok(self.head()? == self.position),
            Direction::Write => Ok(self.head()? == self.tail()?),
        }
    }

    /// Write `data` at the current position
    pub fn push(&mut self, data: &[u8]) -> Result<()> {
        if self.direction != Direction::Write {
            log::error!("queue {} not opened for write", self.id);
            return Err(Violation::QueueNotOpen.into());
        }

        self.falcon.copy_to_dmem(self.position, data)?;
        self.position += align_up(data.len() as u32, QUEUE_ALIGNMENT);
        Ok(())
    }

    /// Read up to `buf.len()` bytes at the current position
    ///
    /// Returns the number of bytes read, which is short when less has been
    /// published (zero when the queue is empty).
    pub fn pop(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.direction != Direction::Read {
            log::error!("queue {} not opened for read", self.id);
            return Err(Violation::QueueNotOpen.into());
        }

        let head = self.head()?;
        let tail = self.position;
        if head == tail {
            return Ok(0);
        }

        let used = if head > tail {
            head - tail
        } else {
            self.geometry.end().saturating_sub(tail)
        };

        let mut size = buf.len();
        if size > used as usize {
            log::warn!("queue {}: requested {} bytes, only {} available", self.id, size, used);
            size = used as usize;
        }
        if size == 0 {
            return Ok(0);
        }

        self.falcon.copy_from_dmem(tail, &mut buf[..size])?;
        self.position += align_up(size as u32, QUEUE_ALIGNMENT);
        Ok(size)
    }

    /// Jump back to the ring base; a writer leaves a REWIND frame behind
    pub fn rewind(&mut self) -> Result<()> {
        if self.direction == Direction::Write {
            self.push(FrameHeader::rewind().as_bytes())?;
            log::debug!("queue {} rewinded", self.id);
        }

        self.position = self.geometry.offset;
        self.manager.rewinds.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Close, publishing the position when `commit` is set
    pub fn close(mut self, commit: bool) -> Result<()> {
        self.finish(commit)
    }

    fn finish(&mut self, commit: bool) -> Result<()> {
        self.closed = true;

        let mut result = Ok(());
        if commit {
            let reg = match self.direction {
                Direction::Read => QueueManager::tail_reg(self.id, &self.geometry),
                Direction::Write => QueueManager::head_reg(self.id, &self.geometry),
            };
            result = reg.map(|reg| self.falcon.write32(reg, self.position));
        }

        if let Err(err) = self.manager.unlock_hw(self.falcon, self.id, &mut self.guard) {
            log::error!("queue {}: mutex release failed: {:?}", self.id, err);
            result = result.and(Err(err));
        }

        result
    }
}

impl Drop for QueueHandle<'_> {
    fn drop(&mut self) {
        if !self.closed {
            log::warn!("queue {} dropped while open", self.id);
            // Errors are already logged by finish
            let _ = self.finish(false);
        }
    }
}
