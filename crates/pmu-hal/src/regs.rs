//! # Falcon PMU Registers
//!
//! Register offsets are absolute (BAR0 relative), as the platform's
//! [`RegisterIo`](crate::RegisterIo) expects them.

/// PMU falcon register block base
pub const FALCON_BASE: u32 = 0x0010_a000;

// =============================================================================
// MASTER CONTROL
// =============================================================================

/// Master control registers (PMC)
pub mod pmc {
    //! Master control: unit enables and interrupt routing

    /// Unit enable register
    pub const ENABLE: u32 = 0x0000_0200;
    /// PMU enable bit
    pub const ENABLE_PMU: u32 = 0x0000_2000;
    /// Interrupt routing mask (stall tree)
    pub const INTR_MASK_0: u32 = 0x0000_0640;
    /// Interrupt routing mask (non-stall tree)
    pub const INTR_MASK_1: u32 = 0x0000_0644;
    /// PMU bit in the routing masks
    pub const INTR_PMU: u32 = 0x0100_0000;
}

// =============================================================================
// FALCON CORE
// =============================================================================

/// Falcon interrupt set (write-1-to-set)
pub const IRQSSET: u32 = FALCON_BASE + 0x000;
/// Falcon interrupt clear (write-1-to-clear)
pub const IRQSCLR: u32 = FALCON_BASE + 0x004;
/// Falcon interrupt status
pub const IRQSTAT: u32 = FALCON_BASE + 0x008;
/// Falcon interrupt mask set
pub const IRQMSET: u32 = FALCON_BASE + 0x010;
/// Falcon interrupt mask clear
pub const IRQMCLR: u32 = FALCON_BASE + 0x014;
/// Falcon interrupt mask
pub const IRQMASK: u32 = FALCON_BASE + 0x018;
/// Falcon interrupt destination
pub const IRQDEST: u32 = FALCON_BASE + 0x01c;
/// Idle status
pub const IDLESTATE: u32 = FALCON_BASE + 0x04c;
/// Idle status busy mask
pub const IDLESTATE_BUSY: u32 = 0x0000_ffff;
/// DMA control (memory scrubbing status)
pub const DMACTL: u32 = FALCON_BASE + 0x10c;
/// IMEM/DMEM scrubbing in progress
pub const DMACTL_SCRUBBING: u32 = 0x0000_0006;
/// External error latch
pub const EXTERR_STAT: u32 = FALCON_BASE + 0x16c;
/// External error valid bit
pub const EXTERR_STAT_VALID: u32 = 1 << 31;

// =============================================================================
// DMEM PORT
// =============================================================================

/// DMEM control for `port`
#[inline]
pub const fn dmemc(port: u32) -> u32 {
    FALCON_BASE + 0x1c0 + port * 8
}

/// DMEM data window for `port`
#[inline]
pub const fn dmemd(port: u32) -> u32 {
    FALCON_BASE + 0x1c4 + port * 8
}

/// DMEMC: auto-increment after each data write
pub const DMEMC_AINCW: u32 = 1 << 24;
/// DMEMC: auto-increment after each data read
pub const DMEMC_AINCR: u32 = 1 << 25;
/// DMEMC: address bits
pub const DMEMC_ADDR_MASK: u32 = 0x0000_fffc;

// =============================================================================
// QUEUES
// =============================================================================

/// Number of hardware command queue register pairs
pub const CMD_QUEUE_REGS: u32 = 4;

/// Command queue head for hardware index `index`
#[inline]
pub const fn queue_head(index: u32) -> u32 {
    FALCON_BASE + 0x4a0 + index * 4
}

/// Command queue tail for hardware index `index`
#[inline]
pub const fn queue_tail(index: u32) -> u32 {
    FALCON_BASE + 0x4b0 + index * 4
}

/// Message queue head
pub const MSGQ_HEAD: u32 = FALCON_BASE + 0x4c8;
/// Message queue tail
pub const MSGQ_TAIL: u32 = FALCON_BASE + 0x4cc;

// =============================================================================
// MUTEXES
// =============================================================================

/// Number of hardware mutexes
pub const MUTEX_COUNT: u32 = 16;

/// Owner-id generator: each read hands out a fresh owner value
pub const MUTEX_ID: u32 = FALCON_BASE + 0x488;
/// Owner-id release: returns a value to the generator
pub const MUTEX_ID_RELEASE: u32 = FALCON_BASE + 0x48c;
/// Owner id field mask
pub const MUTEX_VALUE_MASK: u32 = 0x0000_00ff;
/// Generator value meaning "no id available"
pub const MUTEX_ID_NOT_AVAIL: u32 = 0x0000_00ff;

/// Owner register for mutex `index`
#[inline]
pub const fn mutex(index: u32) -> u32 {
    FALCON_BASE + 0x580 + index * 4
}

// =============================================================================
// IDLE COUNTERS
// =============================================================================

/// Idle counter slot that counts busy cycles
pub const BUSY_SLOT: u32 = 0;
/// Idle counter slot that counts all cycles
pub const CLK_SLOT: u32 = 7;

/// Idle counter mask for `slot`
#[inline]
pub const fn idle_mask(slot: u32) -> u32 {
    FALCON_BASE + 0x504 + slot * 0x10
}

/// Idle counter value for `slot`
#[inline]
pub const fn idle_count(slot: u32) -> u32 {
    FALCON_BASE + 0x508 + slot * 0x10
}

/// Idle counter control for `slot`
#[inline]
pub const fn idle_ctrl(slot: u32) -> u32 {
    FALCON_BASE + 0x50c + slot * 0x10
}

/// Writing this to a counter resets it
pub const IDLE_COUNT_RESET: u32 = 0x8000_0000;
