//! # DVFS Load Governor
//!
//! Periodic load sampling from two falcon idle counters.
//!
//! Counter slot 0 counts busy cycles and slot 7 counts every cycle. Each
//! tick reads both, resets them, folds the utilisation into a smoothed
//! load and picks a performance state:
//!
//! ```text
//!   load > load_max   ──▶ step up by count/3 (clamped to the top state)
//!   otherwise         ──▶ current + ((load - target) * 10 / target) / 2
//!                         clamped to [0, count - 1]
//! ```
//!
//! Clock and voltage programming stays behind [`PerfStates`].

use pmu_core::Result;
use pmu_hal::{regs, Falcon};

/// Performance state control supplied by the clock driver
pub trait PerfStates: Send {
    /// Number of states; zero while the clock driver is not ready
    fn count(&self) -> u32;

    /// Current state
    fn current(&self) -> u32;

    /// Switch to `state`
    fn set(&mut self, state: u32) -> Result<()>;
}

/// Governor tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DvfsConfig {
    /// Load (percent) the governor steers towards
    pub load_target: u32,
    /// Load above which the governor jumps up
    pub load_max: u32,
    /// Weight of the previous average
    pub smooth: u32,
    /// Sampling period enforced by [`DvfsGovernor::poll`]
    pub period_us: u64,
}

impl DvfsConfig {
    /// Tuning shipped for GK20A
    pub const fn new() -> Self {
        Self {
            load_target: 70,
            load_max: 78,
            smooth: 0,
            period_us: 10_000,
        }
    }
}

impl Default for DvfsConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// One counter sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSample {
    /// Busy cycles
    pub busy: u32,
    /// All cycles
    pub total: u32,
}

impl LoadSample {
    /// Busy percentage, zero when nothing was counted
    pub fn utilization(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        (self.busy as u64 * 100 / self.total as u64) as u32
    }
}

/// Load governor
#[derive(Debug)]
pub struct DvfsGovernor<P> {
    perf: P,
    config: DvfsConfig,
    avg_load: u32,
    last_tick_us: Option<u64>,
}

impl<P: PerfStates> DvfsGovernor<P> {
    /// Governor driving `perf`
    pub fn new(perf: P, config: DvfsConfig) -> Self {
        Self {
            perf,
            config,
            avg_load: 0,
            last_tick_us: None,
        }
    }

    /// Program the busy and clock counters
    pub fn init_counters(&self, falcon: &Falcon) {
        falcon.write32(regs::idle_mask(regs::BUSY_SLOT), 0x0020_0001);
        falcon.write32(regs::idle_ctrl(regs::BUSY_SLOT), 0x0000_0002);
        falcon.write32(regs::idle_ctrl(regs::CLK_SLOT), 0x0000_0003);
    }

    /// Read both counters
    pub fn sample(&self, falcon: &Falcon) -> LoadSample {
        LoadSample {
            busy: falcon.read32(regs::idle_count(regs::BUSY_SLOT)),
            total: falcon.read32(regs::idle_count(regs::CLK_SLOT)),
        }
    }

    fn reset_counters(&self, falcon: &Falcon) {
        falcon.write32(regs::idle_count(regs::BUSY_SLOT), regs::IDLE_COUNT_RESET);
        falcon.write32(regs::idle_count(regs::CLK_SLOT), regs::IDLE_COUNT_RESET);
    }

    /// Smoothed load
    #[inline]
    pub fn avg_load(&self) -> u32 {
        self.avg_load
    }

    /// The controlled performance states
    pub fn perf(&self) -> &P {
        &self.perf
    }

    /// State to move to from `current` at `load`
    pub fn target(&self, current: u32, load: u32) -> u32 {
        let count = self.perf.count();
        if count == 0 {
            return current;
        }
        let top = count - 1;

        if load > self.config.load_max {
            return top.min(current + count / 3);
        }

        let load = load as i64;
        let goal = self.config.load_target.max(1) as i64;
        let level = current as i64 + ((load - goal) * 10 / goal) / 2;
        level.clamp(0, top as i64) as u32
    }

    /// Sample, update the average and apply a new state if needed
    ///
    /// Returns the state switched to. The counters are reset on every call.
    pub fn tick(&mut self, falcon: &Falcon) -> Result<Option<u32>> {
        self.last_tick_us = Some(falcon.now_us());
        let result = self.step(falcon);
        self.reset_counters(falcon);
        result
    }

    /// [`tick`](Self::tick), unless the previous tick was less than
    /// `period_us` ago
    ///
    /// Lets a caller woken at any rate sample at the configured period.
    pub fn poll(&mut self, falcon: &Falcon) -> Result<Option<u32>> {
        if let Some(last) = self.last_tick_us {
            if falcon.now_us().saturating_sub(last) < self.config.period_us {
                return Ok(None);
            }
        }
        self.tick(falcon)
    }

    fn step(&mut self, falcon: &Falcon) -> Result<Option<u32>> {
        if self.perf.count() == 0 {
            log::debug!("dvfs: perf states not ready");
            return Ok(None);
        }

        let utilization = self.sample(falcon).utilization();
        let smooth = self.config.smooth;
        self.avg_load = (smooth * self.avg_load + utilization) / (smooth + 1);
        log::trace!("utilization = {} %, avg_load = {} %", utilization, self.avg_load);

        let current = self.perf.current();
        let state = self.target(current, self.avg_load);
        if state == current {
            return Ok(None);
        }

        log::trace!("set new state to {}", state);
        self.perf.set(state)?;
        Ok(Some(state))
    }
}
