//! # Falcon Context
//!
//! Owns the platform capabilities and serialises the DMEM copy port.
//!
//! DMEM is reached through a narrow window: program the control register
//! with a start address and an auto-increment mode, then stream 32-bit words
//! through the data register. All queues and payload staging share port 0,
//! so every copy holds `port_lock` for its whole duration.

use alloc::boxed::Box;
use core::fmt;

use pmu_core::{align_up, Error, Result};
use spin::Mutex;

use crate::io::{Clock, RegisterIo};
use crate::regs;

/// DMEM accesses are word granular
pub const DMEM_ALIGNMENT: u32 = 4;

/// DMEM port used for all host copies
const PORT: u32 = 0;

/// Falcon register and DMEM access
pub struct Falcon {
    io: Box<dyn RegisterIo>,
    clock: Box<dyn Clock>,
    port_lock: Mutex<()>,
}

impl fmt::Debug for Falcon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Falcon").finish_non_exhaustive()
    }
}

impl Falcon {
    /// Wrap the platform capabilities
    pub fn new(io: impl RegisterIo + 'static, clock: impl Clock + 'static) -> Self {
        Self {
            io: Box::new(io),
            clock: Box::new(clock),
            port_lock: Mutex::new(()),
        }
    }

    /// Read a register
    #[inline]
    pub fn read32(&self, addr: u32) -> u32 {
        self.io.read32(addr)
    }

    /// Write a register
    #[inline]
    pub fn write32(&self, addr: u32, value: u32) {
        self.io.write32(addr, value)
    }

    /// Read-modify-write a register
    #[inline]
    pub fn mask32(&self, addr: u32, clear: u32, set: u32) -> u32 {
        self.io.mask32(addr, clear, set)
    }

    /// Monotonic time in microseconds
    #[inline]
    pub fn now_us(&self) -> u64 {
        self.clock.now_us()
    }

    /// Bounded sleep
    #[inline]
    pub fn delay_us(&self, us: u64) {
        self.clock.delay_us(us)
    }

    /// Poll register until `(value & mask) == expected` or `timeout_us` elapses
    pub fn poll32(
        &self,
        addr: u32,
        mask: u32,
        expected: u32,
        timeout_us: u64,
        interval_us: u64,
    ) -> Result<()> {
        let deadline = self.now_us().saturating_add(timeout_us);

        loop {
            if (self.read32(addr) & mask) == expected {
                return Ok(());
            }

            if self.now_us() >= deadline {
                return Err(Error::Timeout);
            }

            self.delay_us(interval_us.max(1));
        }
    }

    // =========================================================================
    // DMEM PORT
    // =========================================================================

    fn check_dmem_args(offset: u32, len: usize) -> Result<()> {
        if len == 0 {
            log::error!("dmem copy: size is zero");
            return Err(Error::InvalidArgument);
        }
        if offset & (DMEM_ALIGNMENT - 1) != 0 {
            log::error!("dmem copy: offset 0x{:08x} not 4-byte aligned", offset);
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    /// Copy `src` into DMEM at `offset`
    pub fn copy_to_dmem(&self, offset: u32, src: &[u8]) -> Result<()> {
        Self::check_dmem_args(offset, src.len())?;

        let _port = self.port_lock.lock();
        let offset = offset & regs::DMEMC_ADDR_MASK;

        self.write32(regs::dmemc(PORT), offset | regs::DMEMC_AINCW);

        for chunk in src.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.write32(regs::dmemd(PORT), u32::from_le_bytes(word));
        }

        let reached = self.read32(regs::dmemc(PORT)) & regs::DMEMC_ADDR_MASK;
        let expected = offset + align_up(src.len() as u32, DMEM_ALIGNMENT);
        if reached != expected {
            log::error!(
                "dmem copy failed: bytes written {}, expected {}",
                reached.wrapping_sub(offset),
                expected - offset
            );
        }

        Ok(())
    }

    /// Fill `dst` from DMEM at `offset`
    pub fn copy_from_dmem(&self, offset: u32, dst: &mut [u8]) -> Result<()> {
        Self::check_dmem_args(offset, dst.len())?;

        let _port = self.port_lock.lock();
        let offset = offset & regs::DMEMC_ADDR_MASK;

        self.write32(regs::dmemc(PORT), offset | regs::DMEMC_AINCR);

        for chunk in dst.chunks_mut(4) {
            let word = self.read32(regs::dmemd(PORT)).to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }

        Ok(())
    }
}
