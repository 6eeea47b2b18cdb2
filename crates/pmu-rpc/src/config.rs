//! # Engine Configuration
//!
//! Retry budgets and hardware wait limits.

use pmu_hal::mutex::{DEFAULT_RETRIES, DEFAULT_RETRY_DELAY_US};
use pmu_mem::PAYLOAD_ALIGNMENT;

/// Protocol engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Hardware mutex acquisition attempts after the first
    pub mutex_retries: u32,
    /// Sleep between hardware mutex attempts
    pub mutex_retry_delay_us: u64,
    /// Sleep between `open_write` attempts on a full queue
    pub post_retry_delay_us: u64,
    /// Limit for DMEM/IMEM scrubbing after enable
    pub scrub_timeout_us: u64,
    /// Limit for the falcon to report idle after enable
    pub idle_timeout_us: u64,
    /// Register polling interval
    pub poll_interval_us: u64,
    /// Alignment of staged payload blocks
    pub payload_alignment: u32,
}

impl EngineConfig {
    /// Configuration matching the shipped firmware
    pub const fn new() -> Self {
        Self {
            mutex_retries: DEFAULT_RETRIES,
            mutex_retry_delay_us: DEFAULT_RETRY_DELAY_US,
            post_retry_delay_us: 1000,
            scrub_timeout_us: 2_000_000,
            idle_timeout_us: 2_000_000,
            poll_interval_us: 10,
            payload_alignment: PAYLOAD_ALIGNMENT,
        }
    }

    /// Override the hardware mutex retry policy
    pub const fn with_mutex_retries(mut self, retries: u32, delay_us: u64) -> Self {
        self.mutex_retries = retries;
        self.mutex_retry_delay_us = delay_us;
        self
    }

    /// Override the full-queue retry delay
    pub const fn with_post_retry_delay(mut self, delay_us: u64) -> Self {
        self.post_retry_delay_us = delay_us;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
