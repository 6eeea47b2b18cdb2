//! # Simulated Register File
//!
//! Registers with side effects are decoded explicitly; everything else is
//! plain storage that reads back what was written (zero by default).

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use pmu_hal::regs;
use pmu_hal::RegisterIo;
use spin::Mutex;

use crate::firmware::InitLayout;
use crate::SIM_DMEM_SIZE;

/// Owner ids handed out by the generator
const MUTEX_ID_FIRST: u32 = 0x01;
const MUTEX_ID_LAST: u32 = 0xfe;

#[derive(Debug)]
pub(crate) struct SimState {
    pub(crate) regs: BTreeMap<u32, u32>,
    pub(crate) dmem: Vec<u8>,
    dmemc_addr: u32,
    dmemc_mode: u32,
    mutex_ids: Vec<u32>,
    ids_exhausted: bool,
    irq_stat: u32,
    irq_mask: u32,
    irq_dest: u32,
    pub(crate) layout: Option<InitLayout>,
}

impl SimState {
    fn new() -> Self {
        Self {
            regs: BTreeMap::new(),
            dmem: vec![0; SIM_DMEM_SIZE],
            dmemc_addr: 0,
            dmemc_mode: 0,
            // popped from the back: lowest id first
            mutex_ids: (MUTEX_ID_FIRST..=MUTEX_ID_LAST).rev().collect(),
            ids_exhausted: false,
            irq_stat: 0,
            irq_mask: 0,
            irq_dest: 0xff,
            layout: None,
        }
    }

    pub(crate) fn reg(&self, addr: u32) -> u32 {
        self.regs.get(&addr).copied().unwrap_or(0)
    }

    pub(crate) fn dmem_word(&self, addr: u32) -> u32 {
        let at = addr as usize;
        match self.dmem.get(at..at + 4) {
            Some(bytes) => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            None => 0,
        }
    }

    fn set_dmem_word(&mut self, addr: u32, value: u32) {
        let at = addr as usize;
        if let Some(bytes) = self.dmem.get_mut(at..at + 4) {
            bytes.copy_from_slice(&value.to_le_bytes());
        }
    }

    pub(crate) fn raise(&mut self, bits: u32) {
        self.irq_stat |= bits;
    }

    fn read(&mut self, addr: u32) -> u32 {
        match addr {
            a if a == regs::dmemc(0) => self.dmemc_addr | self.dmemc_mode,
            a if a == regs::dmemd(0) => {
                let value = self.dmem_word(self.dmemc_addr);
                if self.dmemc_mode & regs::DMEMC_AINCR != 0 {
                    self.dmemc_addr = (self.dmemc_addr + 4) & regs::DMEMC_ADDR_MASK;
                }
                value
            }
            regs::MUTEX_ID => {
                if self.ids_exhausted {
                    return regs::MUTEX_ID_NOT_AVAIL;
                }
                self.mutex_ids.pop().unwrap_or(regs::MUTEX_ID_NOT_AVAIL)
            }
            regs::IRQSTAT => self.irq_stat,
            regs::IRQMASK => self.irq_mask,
            regs::IRQDEST => self.irq_dest,
            _ => self.reg(addr),
        }
    }

    fn write(&mut self, addr: u32, value: u32) {
        match addr {
            a if a == regs::dmemc(0) => {
                self.dmemc_addr = value & regs::DMEMC_ADDR_MASK;
                self.dmemc_mode = value & (regs::DMEMC_AINCW | regs::DMEMC_AINCR);
            }
            a if a == regs::dmemd(0) => {
                self.set_dmem_word(self.dmemc_addr, value);
                if self.dmemc_mode & regs::DMEMC_AINCW != 0 {
                    self.dmemc_addr = (self.dmemc_addr + 4) & regs::DMEMC_ADDR_MASK;
                }
            }
            regs::MUTEX_ID_RELEASE => {
                let id = value & regs::MUTEX_VALUE_MASK;
                if (MUTEX_ID_FIRST..=MUTEX_ID_LAST).contains(&id) && !self.mutex_ids.contains(&id) {
                    self.mutex_ids.push(id);
                }
            }
            a if (regs::mutex(0)..regs::mutex(regs::MUTEX_COUNT)).contains(&a) => {
                let value = value & regs::MUTEX_VALUE_MASK;
                // latches only when free; zero always clears
                if value == 0 || self.reg(a) == 0 {
                    self.regs.insert(a, value);
                }
            }
            regs::IRQSSET => self.irq_stat |= value,
            regs::IRQSCLR => self.irq_stat &= !value,
            regs::IRQMSET => self.irq_mask |= value,
            regs::IRQMCLR => self.irq_mask &= !value,
            regs::IRQDEST => self.irq_dest = value,
            a if a == regs::idle_count(regs::BUSY_SLOT)
                || a == regs::idle_count(regs::CLK_SLOT) =>
            {
                let value = if value & regs::IDLE_COUNT_RESET != 0 { 0 } else { value };
                self.regs.insert(a, value);
            }
            _ => {
                self.regs.insert(addr, value);
            }
        }
    }
}

// =============================================================================
// SIM FALCON
// =============================================================================

/// Simulated falcon register file and DMEM
#[derive(Debug)]
pub struct SimFalcon {
    pub(crate) state: Mutex<SimState>,
}

impl SimFalcon {
    /// A powered-up falcon with zeroed DMEM and every owner id available
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::new()),
        }
    }

    /// Peek a register without side effects
    pub fn reg(&self, addr: u32) -> u32 {
        let state = self.state.lock();
        match addr {
            a if a == regs::dmemc(0) => state.dmemc_addr | state.dmemc_mode,
            regs::IRQSTAT => state.irq_stat,
            regs::IRQMASK => state.irq_mask,
            regs::IRQDEST => state.irq_dest,
            _ => state.reg(addr),
        }
    }

    /// Poke a plain register without side effects
    pub fn set_reg(&self, addr: u32, value: u32) {
        self.state.lock().regs.insert(addr, value);
    }

    /// Read `len` bytes of DMEM
    pub fn dmem_read(&self, offset: u32, len: usize) -> Vec<u8> {
        let state = self.state.lock();
        let at = offset as usize;
        state.dmem.get(at..at + len).map(<[u8]>::to_vec).unwrap_or_default()
    }

    /// Write bytes into DMEM
    pub fn dmem_write(&self, offset: u32, bytes: &[u8]) {
        let mut state = self.state.lock();
        let at = offset as usize;
        if let Some(dst) = state.dmem.get_mut(at..at + bytes.len()) {
            dst.copy_from_slice(bytes);
        }
    }

    /// Firmware takes mutex `id` with owner value `owner`
    pub fn hold_mutex(&self, id: u32, owner: u32) {
        self.state
            .lock()
            .regs
            .insert(regs::mutex(id), owner & regs::MUTEX_VALUE_MASK);
    }

    /// Firmware drops mutex `id`
    pub fn drop_mutex(&self, id: u32) {
        self.state.lock().regs.insert(regs::mutex(id), 0);
    }

    /// Current owner value of mutex `id`
    pub fn mutex_owner(&self, id: u32) -> u32 {
        self.state.lock().reg(regs::mutex(id))
    }

    /// Make the owner-id generator report exhaustion
    pub fn exhaust_mutex_ids(&self, exhausted: bool) {
        self.state.lock().ids_exhausted = exhausted;
    }

    /// Owner ids still available from the generator
    pub fn free_mutex_ids(&self) -> usize {
        self.state.lock().mutex_ids.len()
    }

    /// Latch interrupt status bits
    pub fn raise(&self, bits: u32) {
        self.state.lock().raise(bits);
    }
}

impl Default for SimFalcon {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterIo for SimFalcon {
    fn read32(&self, addr: u32) -> u32 {
        self.state.lock().read(addr)
    }

    fn write32(&self, addr: u32, value: u32) {
        self.state.lock().write(addr, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dmem_port_auto_increment() {
        let sim = SimFalcon::new();
        sim.write32(regs::dmemc(0), 0x100 | regs::DMEMC_AINCW);
        sim.write32(regs::dmemd(0), 0x4433_2211);
        sim.write32(regs::dmemd(0), 0x0000_0055);
        assert_eq!(sim.read32(regs::dmemc(0)) & regs::DMEMC_ADDR_MASK, 0x108);
        assert_eq!(sim.dmem_read(0x100, 5), [0x11, 0x22, 0x33, 0x44, 0x55]);

        sim.write32(regs::dmemc(0), 0x104 | regs::DMEMC_AINCR);
        assert_eq!(sim.read32(regs::dmemd(0)), 0x55);
    }

    #[test]
    fn test_mutex_register_latch() {
        let sim = SimFalcon::new();
        let id = sim.read32(regs::MUTEX_ID);
        assert_eq!(id, 1);
        sim.write32(regs::mutex(3), id);
        sim.write32(regs::mutex(3), 0x42);
        assert_eq!(sim.mutex_owner(3), id);
        sim.write32(regs::mutex(3), 0);
        assert_eq!(sim.mutex_owner(3), 0);

        sim.write32(regs::MUTEX_ID_RELEASE, id);
        assert_eq!(sim.read32(regs::MUTEX_ID), id);

        sim.exhaust_mutex_ids(true);
        assert_eq!(sim.read32(regs::MUTEX_ID), regs::MUTEX_ID_NOT_AVAIL);
    }
}
