//! # Falcon Interrupts
//!
//! Interrupt bit definitions and the enable/disable sequence.
//!
//! Enabling is two-level: the falcon's own mask register selects which
//! sources may fire, and the master controller routes the PMU line into
//! both interrupt trees.

use crate::falcon::Falcon;
use crate::regs::{self, pmc};

bitflags::bitflags! {
    /// Falcon interrupt sources
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FalconIrq: u32 {
        /// General purpose timer
        const GPTMR = 1 << 0;
        /// Watchdog timer
        const WDTMR = 1 << 1;
        /// Method
        const MTHD = 1 << 2;
        /// Context switch
        const CTXSW = 1 << 3;
        /// Falcon halted
        const HALT = 1 << 4;
        /// External error
        const EXTERR = 1 << 5;
        /// Software generated 0: new message in the message queue
        const SWGEN0 = 1 << 6;
        /// Software generated 1
        const SWGEN1 = 1 << 7;
    }
}

impl FalconIrq {
    /// Sources that have no handler beyond logging
    pub const FATAL: Self = Self::HALT.union(Self::EXTERR);
}

/// Unmask every falcon source and route the PMU line
pub fn enable(falcon: &Falcon) {
    log::debug!("enable pmu irq");
    falcon.write32(regs::IRQMSET, FalconIrq::all().bits());
    falcon.mask32(pmc::INTR_MASK_0, pmc::INTR_PMU, pmc::INTR_PMU);
    falcon.mask32(pmc::INTR_MASK_1, pmc::INTR_PMU, pmc::INTR_PMU);
}

/// Unroute the PMU line and mask every falcon source
pub fn disable(falcon: &Falcon) {
    log::debug!("disable pmu irq");
    falcon.mask32(pmc::INTR_MASK_0, pmc::INTR_PMU, 0);
    falcon.mask32(pmc::INTR_MASK_1, pmc::INTR_PMU, 0);
    falcon.write32(regs::IRQMCLR, FalconIrq::all().bits());
}

/// Pending sources that are both unmasked and routed to the host
pub fn pending(falcon: &Falcon) -> FalconIrq {
    let mask = falcon.read32(regs::IRQMASK) & falcon.read32(regs::IRQDEST);
    FalconIrq::from_bits_truncate(falcon.read32(regs::IRQSTAT) & mask)
}

/// Acknowledge `irq`
#[inline]
pub fn ack(falcon: &Falcon, irq: FalconIrq) {
    falcon.write32(regs::IRQSCLR, irq.bits());
}

/// Mask sources without touching the routing
#[inline]
pub fn mask(falcon: &Falcon, irq: FalconIrq) {
    falcon.write32(regs::IRQMCLR, irq.bits());
}

/// Clear the external error latch
pub fn clear_exterr(falcon: &Falcon) {
    falcon.mask32(regs::EXTERR_STAT, regs::EXTERR_STAT_VALID, 0);
}
