//! # Occupancy Bitmaps
//!
//! Two bit-sets with bounds-checked access:
//!
//! - [`FixedBitmap`]: inline `[u64; WORDS]`, for tables whose size is a
//!   compile-time constant (the sequence table).
//! - [`Bitmap`]: heap-backed, sized at runtime (the DMEM allocator, whose
//!   range is only known once the PMU reports it).

use alloc::vec;
use alloc::vec::Vec;

const BITS: usize = u64::BITS as usize;

// =============================================================================
// FIXED BITMAP
// =============================================================================

/// Inline bitmap of `WORDS * 64` bits
#[derive(Debug, Clone)]
pub struct FixedBitmap<const WORDS: usize> {
    bits: [u64; WORDS],
}

impl<const WORDS: usize> FixedBitmap<WORDS> {
    /// Number of bits
    pub const CAPACITY: usize = WORDS * BITS;

    /// Create an all-clear bitmap
    pub const fn new() -> Self {
        Self { bits: [0; WORDS] }
    }

    /// Set a bit. Out-of-range indices are ignored.
    #[inline]
    pub fn set(&mut self, index: usize) {
        if let Some(word) = self.bits.get_mut(index / BITS) {
            *word |= 1u64 << (index % BITS);
        }
    }

    /// Clear a bit. Out-of-range indices are ignored.
    #[inline]
    pub fn clear(&mut self, index: usize) {
        if let Some(word) = self.bits.get_mut(index / BITS) {
            *word &= !(1u64 << (index % BITS));
        }
    }

    /// Test a bit. Out-of-range indices read as clear.
    #[inline]
    pub fn test(&self, index: usize) -> bool {
        self.bits
            .get(index / BITS)
            .is_some_and(|word| word & (1u64 << (index % BITS)) != 0)
    }

    /// Index of the first clear bit
    pub fn first_zero(&self) -> Option<usize> {
        self.bits
            .iter()
            .enumerate()
            .find(|(_, word)| **word != u64::MAX)
            .map(|(i, word)| i * BITS + word.trailing_ones() as usize)
    }

    /// Number of set bits
    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }
}

impl<const WORDS: usize> Default for FixedBitmap<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// GROWABLE BITMAP
// =============================================================================

/// Heap-backed bitmap of `len` bits
#[derive(Debug, Clone)]
pub struct Bitmap {
    words: Vec<u64>,
    len: usize,
}

impl Bitmap {
    /// Create an all-clear bitmap of `len` bits
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(BITS)],
            len,
        }
    }

    /// Number of bits
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Is the bitmap zero-length?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Test a bit. Out-of-range indices read as clear.
    #[inline]
    pub fn test(&self, index: usize) -> bool {
        index < self.len && self.words[index / BITS] & (1u64 << (index % BITS)) != 0
    }

    /// Set `count` bits starting at `start`, clipped to the bitmap
    pub fn set_range(&mut self, start: usize, count: usize) {
        let end = start.saturating_add(count).min(self.len);
        for i in start..end {
            self.words[i / BITS] |= 1u64 << (i % BITS);
        }
    }

    /// Clear `count` bits starting at `start`, clipped to the bitmap
    pub fn clear_range(&mut self, start: usize, count: usize) {
        let end = start.saturating_add(count).min(self.len);
        for i in start..end {
            self.words[i / BITS] &= !(1u64 << (i % BITS));
        }
    }

    /// Are all `count` bits starting at `start` set and in range?
    pub fn is_range_set(&self, start: usize, count: usize) -> bool {
        match start.checked_add(count) {
            Some(end) if end <= self.len => (start..end).all(|i| self.test(i)),
            _ => false,
        }
    }

    /// Number of set bits
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// First clear bit at or after `from`
    fn next_zero(&self, from: usize) -> Option<usize> {
        let mut i = from;
        while i < self.len {
            let word = self.words[i / BITS] | ((1u64 << (i % BITS)) - 1);
            if word == u64::MAX {
                i = (i / BITS + 1) * BITS;
                continue;
            }
            let hit = (i / BITS) * BITS + word.trailing_ones() as usize;
            return (hit < self.len).then_some(hit);
        }
        None
    }

    /// First set bit in `[from, to)`
    fn next_set(&self, from: usize, to: usize) -> Option<usize> {
        (from..to.min(self.len)).find(|&i| self.test(i))
    }

    /// Find a run of `count` clear bits starting at or after `start`
    ///
    /// The run start is rounded up to a multiple of `align_mask + 1`.
    /// Returns the first fitting run (first fit).
    pub fn find_zero_area(&self, start: usize, count: usize, align_mask: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }

        let mut index = start;
        loop {
            index = self.next_zero(index)?;
            index = (index + align_mask) & !align_mask;
            let end = index.checked_add(count)?;
            if end > self.len {
                return None;
            }
            match self.next_set(index, end) {
                None => return Some(index),
                Some(busy) => index = busy + 1,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_first_zero() {
        let mut map = FixedBitmap::<2>::new();
        assert_eq!(map.first_zero(), Some(0));
        for i in 0..70 {
            map.set(i);
        }
        assert_eq!(map.first_zero(), Some(70));
        map.clear(3);
        assert_eq!(map.first_zero(), Some(3));
        assert_eq!(map.count(), 69);
    }

    #[test]
    fn test_fixed_full() {
        let mut map = FixedBitmap::<1>::new();
        for i in 0..64 {
            map.set(i);
        }
        assert_eq!(map.first_zero(), None);
        map.set(200);
        assert!(!map.test(200));
    }

    #[test]
    fn test_find_zero_area_first_fit() {
        let mut map = Bitmap::new(128);
        assert_eq!(map.find_zero_area(0, 8, 0), Some(0));
        map.set_range(0, 8);
        assert_eq!(map.find_zero_area(0, 8, 0), Some(8));
        map.set_range(10, 2);
        // 8..10 is too small, next run starts at 12
        assert_eq!(map.find_zero_area(0, 4, 0), Some(12));
        // aligned to 8: 16 is the first aligned free run
        assert_eq!(map.find_zero_area(0, 4, 7), Some(16));
    }

    #[test]
    fn test_find_zero_area_exhausted() {
        let mut map = Bitmap::new(16);
        map.set_range(0, 12);
        assert_eq!(map.find_zero_area(0, 4, 0), Some(12));
        assert_eq!(map.find_zero_area(0, 5, 0), None);
        assert_eq!(map.find_zero_area(0, 0, 0), None);
    }

    #[test]
    fn test_range_set_and_clear() {
        let mut map = Bitmap::new(100);
        map.set_range(60, 10);
        assert!(map.is_range_set(60, 10));
        assert!(!map.is_range_set(59, 10));
        assert!(!map.is_range_set(95, 10));
        map.clear_range(62, 2);
        assert_eq!(map.count(), 8);
        assert!(map.test(61));
        assert!(!map.test(62));
        assert!(map.test(64));
    }
}
