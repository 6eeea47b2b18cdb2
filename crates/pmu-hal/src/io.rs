//! # Platform Capabilities
//!
//! The services the transport consumes from its platform.

use alloc::sync::Arc;

// =============================================================================
// REGISTER I/O
// =============================================================================

/// Raw 32-bit register access
///
/// Addresses are absolute register offsets. MMIO is inherently shared, so
/// every method takes `&self`; implementations provide their own interior
/// mutability.
pub trait RegisterIo: Send + Sync {
    /// Read a 32-bit register
    fn read32(&self, addr: u32) -> u32;

    /// Write a 32-bit register
    fn write32(&self, addr: u32, value: u32);

    /// Read-modify-write: clear `clear`, then set `set`. Returns the old value.
    fn mask32(&self, addr: u32, clear: u32, set: u32) -> u32 {
        let old = self.read32(addr);
        self.write32(addr, (old & !clear) | set);
        old
    }
}

impl<T: RegisterIo + ?Sized> RegisterIo for Arc<T> {
    fn read32(&self, addr: u32) -> u32 {
        (**self).read32(addr)
    }

    fn write32(&self, addr: u32, value: u32) {
        (**self).write32(addr, value)
    }

    fn mask32(&self, addr: u32, clear: u32, set: u32) -> u32 {
        (**self).mask32(addr, clear, set)
    }
}

// =============================================================================
// CLOCK
// =============================================================================

/// Monotonic time and bounded sleeps
pub trait Clock: Send + Sync {
    /// Monotonic time in microseconds
    fn now_us(&self) -> u64;

    /// Sleep (or spin) for at least `us` microseconds
    fn delay_us(&self, us: u64);
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }

    fn delay_us(&self, us: u64) {
        (**self).delay_us(us)
    }
}

// =============================================================================
// DEFERRED WORK
// =============================================================================

/// Deferred work queue for the single message drain worker
pub trait WorkScheduler: Send + Sync {
    /// Queue the drain worker. Scheduling an already queued worker is a no-op.
    fn schedule(&self);

    /// Cancel the worker and wait for a running instance to finish
    fn cancel_sync(&self);
}

impl<T: WorkScheduler + ?Sized> WorkScheduler for Arc<T> {
    fn schedule(&self) {
        (**self).schedule()
    }

    fn cancel_sync(&self) {
        (**self).cancel_sync()
    }
}
