//! # DMEM Allocator
//!
//! Bitmap block allocator over a fixed DMEM range.
//!
//! Each bit tracks one [`DMEM_UNIT`]-sized unit. Requests are rounded up to
//! their alignment and placed first fit, so live blocks can never overlap.
//! Freeing is checked: a block is only released if every unit it covers is
//! currently allocated.

use pmu_core::{align_up, Bitmap, Error, Result, Violation};

/// Allocation granule (DMEM is word addressed)
pub const DMEM_UNIT: u32 = 4;

/// Alignment used for command payload blocks
pub const PAYLOAD_ALIGNMENT: u32 = 32;

// =============================================================================
// BLOCK
// =============================================================================

/// A live allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmemBlock {
    /// Absolute DMEM offset
    pub offset: u32,
    /// Length rounded up to the allocation alignment
    pub len: u32,
    /// Length the caller asked for
    pub requested: u32,
}

impl DmemBlock {
    /// One past the last byte of the block
    #[inline]
    pub const fn end(&self) -> u32 {
        self.offset + self.len
    }
}

// =============================================================================
// ALLOCATOR
// =============================================================================

/// Allocator statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DmemStats {
    /// Successful allocations
    pub allocs: u64,
    /// Successful frees
    pub frees: u64,
    /// High water mark in units
    pub peak_units: u32,
}

/// First-fit allocator over `[base, base + size)`
#[derive(Debug)]
pub struct DmemAllocator {
    base: u32,
    size: u32,
    bitmap: Bitmap,
    stats: DmemStats,
}

impl DmemAllocator {
    /// Create an allocator with every unit free
    pub fn new(base: u32, size: u32) -> Self {
        log::debug!("dmem allocator: base 0x{:x}, size 0x{:x}", base, size);
        Self {
            base,
            size,
            bitmap: Bitmap::new(size.div_ceil(DMEM_UNIT) as usize),
            stats: DmemStats::default(),
        }
    }

    /// First byte of the managed range
    #[inline]
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Size of the managed range in bytes
    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Units currently allocated
    #[inline]
    pub fn used_units(&self) -> u32 {
        self.bitmap.count() as u32
    }

    /// Allocator statistics
    #[inline]
    pub fn stats(&self) -> DmemStats {
        self.stats
    }

    /// Allocate `len` bytes aligned to `align`
    ///
    /// With `at` set the block must land exactly at that offset, otherwise
    /// the first free run wins.
    pub fn alloc(&mut self, len: u32, align: u32, at: Option<u32>) -> Result<DmemBlock> {
        if !align.is_power_of_two() || align < DMEM_UNIT {
            return Err(Error::InvalidArgument);
        }

        let rounded = align_up(len, align);
        if rounded == 0 {
            return Err(Error::OutOfSpace);
        }
        let units = (rounded / DMEM_UNIT) as usize;
        let align_mask = (align / DMEM_UNIT - 1) as usize;

        let start = match at {
            Some(offset) => {
                let rel = offset.checked_sub(self.base).ok_or(Error::OutOfSpace)?;
                if rel % DMEM_UNIT != 0 {
                    return Err(Error::OutOfSpace);
                }
                (rel / DMEM_UNIT) as usize
            }
            None => 0,
        };

        let index = self
            .bitmap
            .find_zero_area(start, units, align_mask)
            .ok_or(Error::OutOfSpace)?;
        if at.is_some() && index != start {
            return Err(Error::OutOfSpace);
        }

        self.bitmap.set_range(index, units);
        self.stats.allocs += 1;
        self.stats.peak_units = self.stats.peak_units.max(self.used_units());

        let block = DmemBlock {
            offset: self.base + index as u32 * DMEM_UNIT,
            len: rounded,
            requested: len,
        };
        log::trace!("dmem alloc {:?}", block);
        Ok(block)
    }

    /// Return `block` to the allocator
    ///
    /// Fails with [`Violation::UnallocatedFree`] (and changes nothing) when
    /// any unit of the block is outside the range or not allocated.
    pub fn free(&mut self, block: DmemBlock) -> Result<()> {
        let (start, units) = self.units_of(&block).ok_or(Violation::UnallocatedFree)?;
        if !self.bitmap.is_range_set(start, units) {
            log::error!("dmem free of unallocated block {:?}", block);
            return Err(Violation::UnallocatedFree.into());
        }

        self.bitmap.clear_range(start, units);
        self.stats.frees += 1;
        log::trace!("dmem free {:?}", block);
        Ok(())
    }

    fn units_of(&self, block: &DmemBlock) -> Option<(usize, usize)> {
        let rel = block.offset.checked_sub(self.base)?;
        if rel % DMEM_UNIT != 0 || block.len == 0 || block.len % DMEM_UNIT != 0 {
            return None;
        }
        Some(((rel / DMEM_UNIT) as usize, (block.len / DMEM_UNIT) as usize))
    }

    /// Tear the allocator down. Blocks still allocated are dropped with it.
    pub fn destroy(self) {
        let leaked = self.used_units();
        if leaked != 0 {
            log::warn!("dmem allocator destroyed with {} units in use", leaked);
        }
    }
}
