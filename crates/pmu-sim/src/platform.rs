//! # Simulated Platform
//!
//! Deterministic stand-ins for the clock and the deferred work queue.

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use pmu_hal::{Clock, WorkScheduler};

/// Manual clock: time only moves when something sleeps or [`advance`] is called
///
/// [`advance`]: SimClock::advance
#[derive(Debug, Default)]
pub struct SimClock {
    now_us: AtomicU64,
}

impl SimClock {
    /// Clock starting at zero
    pub const fn new() -> Self {
        Self {
            now_us: AtomicU64::new(0),
        }
    }

    /// Move time forward
    pub fn advance(&self, us: u64) {
        self.now_us.fetch_add(us, Ordering::SeqCst);
    }
}

impl Clock for SimClock {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst)
    }

    fn delay_us(&self, us: u64) {
        self.advance(us);
    }
}

/// Scheduler that only records requests; tests run the drain themselves
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    scheduled: AtomicUsize,
    cancelled: AtomicUsize,
}

impl RecordingScheduler {
    /// Fresh scheduler with nothing queued
    pub const fn new() -> Self {
        Self {
            scheduled: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
        }
    }

    /// Number of schedule requests since the last call, resetting the count
    pub fn take(&self) -> usize {
        self.scheduled.swap(0, Ordering::SeqCst)
    }

    /// Number of `cancel_sync` calls
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl WorkScheduler for RecordingScheduler {
    fn schedule(&self) {
        self.scheduled.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel_sync(&self) {
        self.scheduled.store(0, Ordering::SeqCst);
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }
}
