//! # Hardware Mutexes
//!
//! The falcon exposes a bank of mutex registers shared between the host
//! and the PMU firmware. Ownership is claimed by writing an owner value
//! into the mutex register and reading it back:
//!
//! ```text
//!   host                         falcon
//!   ────                         ──────
//!   read  MUTEX_ID        ─────▶ hands out a fresh owner value
//!   write MUTEX(i) = owner ────▶ latches only if the mutex is free
//!   read  MUTEX(i)        ─────▶ == owner ? acquired : lost the race
//!   write MUTEX_ID_RELEASE ───▶ owner value back to the generator
//! ```
//!
//! The host side adds a reference count per mutex so the same token can
//! re-acquire a mutex it already holds.

use pmu_core::{Error, MutexToken, Result, Violation};
use spin::Mutex;

use crate::falcon::Falcon;
use crate::regs;

/// Default retry budget (worst case wait is about 40 * 40us)
pub const DEFAULT_RETRIES: u32 = 40;

/// Default sleep between attempts
pub const DEFAULT_RETRY_DELAY_US: u64 = 20;

/// Host-side arbiter over the falcon mutex bank
#[derive(Debug)]
pub struct MutexArbiter {
    ref_counts: Mutex<[u32; regs::MUTEX_COUNT as usize]>,
    retries: u32,
    retry_delay_us: u64,
}

impl MutexArbiter {
    /// Create an arbiter with an explicit retry policy
    pub const fn new(retries: u32, retry_delay_us: u64) -> Self {
        Self {
            ref_counts: Mutex::new([0; regs::MUTEX_COUNT as usize]),
            retries,
            retry_delay_us,
        }
    }

    fn check_id(id: u32) -> Result<()> {
        if id >= regs::MUTEX_COUNT {
            log::error!("mutex id {} out of range", id);
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    fn owner(falcon: &Falcon, id: u32) -> MutexToken {
        MutexToken(falcon.read32(regs::mutex(id)) & regs::MUTEX_VALUE_MASK)
    }

    /// Acquire mutex `id`
    ///
    /// If `token` already owns the mutex the reference count is bumped and
    /// the same token is returned. Otherwise a fresh owner value is claimed,
    /// retrying while the firmware holds the mutex. Fails with
    /// [`Error::Busy`] when the generator is exhausted or the retry budget
    /// runs out.
    pub fn acquire(&self, falcon: &Falcon, id: u32, token: MutexToken) -> Result<MutexToken> {
        Self::check_id(id)?;

        let owner = Self::owner(falcon, id);
        if token.is_valid() && token == owner {
            let mut counts = self.ref_counts.lock();
            let count = &mut counts[id as usize];
            if *count == 0 {
                log::error!("mutex {} owned by {:?} but not counted", id, token);
                return Err(Error::InvalidArgument);
            }
            *count += 1;
            log::debug!("mutex {} already acquired by {:?}", id, token);
            return Ok(token);
        }

        for _ in 0..=self.retries {
            let candidate = falcon.read32(regs::MUTEX_ID) & regs::MUTEX_VALUE_MASK;
            if candidate == 0 || candidate == regs::MUTEX_ID_NOT_AVAIL {
                log::warn!("fail to generate mutex token: val 0x{:08x}", candidate);
                return Err(Error::Busy);
            }

            falcon.write32(regs::mutex(id), candidate);
            if Self::owner(falcon, id).0 == candidate {
                self.ref_counts.lock()[id as usize] = 1;
                log::debug!("mutex acquired: id={}, token=0x{:x}", id, candidate);
                return Ok(MutexToken(candidate));
            }

            log::debug!("fail to acquire mutex idx={}", id);
            falcon.mask32(regs::MUTEX_ID_RELEASE, regs::MUTEX_VALUE_MASK, candidate);
            falcon.delay_us(self.retry_delay_us);
        }

        Err(Error::Busy)
    }

    /// Release one reference to mutex `id`
    ///
    /// The hardware mutex is cleared (and its owner value returned to the
    /// generator) only when the last reference goes away.
    pub fn release(&self, falcon: &Falcon, id: u32, token: MutexToken) -> Result<()> {
        Self::check_id(id)?;

        let owner = Self::owner(falcon, id);
        if token != owner {
            log::error!("requester {:?} does not match owner {:?}", token, owner);
            return Err(Violation::NotMutexOwner.into());
        }

        let mut counts = self.ref_counts.lock();
        let count = &mut counts[id as usize];
        *count = count.saturating_sub(1);
        if *count > 0 {
            return Ok(());
        }

        falcon.write32(regs::mutex(id), 0);
        falcon.mask32(regs::MUTEX_ID_RELEASE, regs::MUTEX_VALUE_MASK, owner.0);
        log::debug!("mutex released: id={}, token={:?}", id, token);

        Ok(())
    }

    /// Current reference count of mutex `id`
    pub fn ref_count(&self, id: u32) -> u32 {
        self.ref_counts
            .lock()
            .get(id as usize)
            .copied()
            .unwrap_or(0)
    }
}

impl Default for MutexArbiter {
    fn default() -> Self {
        Self::new(DEFAULT_RETRIES, DEFAULT_RETRY_DELAY_US)
    }
}
