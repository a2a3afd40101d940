//! Fixed-width position bitset
//!
//! One bit per canonical slot, packed into four `u64` words. Region masks,
//! nonzero-residue vectors and per-pair match vectors all use this type so
//! the kernel's contraction step is an AND followed by a popcount.

use crate::numbering::CANONICAL_WIDTH;

const WORDS: usize = (CANONICAL_WIDTH + 63) / 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PositionBits {
    words: [u64; WORDS],
}

impl PositionBits {
    pub const fn empty() -> Self {
        Self { words: [0; WORDS] }
    }

    /// All canonical slots set
    pub fn full() -> Self {
        let mut bits = Self::empty();
        for slot in 0..CANONICAL_WIDTH {
            bits.insert(slot);
        }
        bits
    }

    pub fn from_slots<I: IntoIterator<Item = usize>>(slots: I) -> Self {
        let mut bits = Self::empty();
        for slot in slots {
            bits.insert(slot);
        }
        bits
    }

    #[inline(always)]
    pub fn insert(&mut self, slot: usize) {
        debug_assert!(slot < CANONICAL_WIDTH, "slot {slot} out of range");
        self.words[slot / 64] |= 1u64 << (slot % 64);
    }

    #[inline(always)]
    pub fn contains(&self, slot: usize) -> bool {
        slot < CANONICAL_WIDTH && self.words[slot / 64] & (1u64 << (slot % 64)) != 0
    }

    /// OR a 32-bit lane mask in at slot offset `base` (multiple of 32).
    #[inline(always)]
    pub(crate) fn or_lane32(&mut self, base: usize, lane: u32) {
        debug_assert_eq!(base % 32, 0);
        self.words[base / 64] |= (lane as u64) << (base % 64);
    }

    /// OR a 16-bit lane mask in at slot offset `base` (multiple of 16).
    #[inline(always)]
    pub(crate) fn or_lane16(&mut self, base: usize, lane: u16) {
        debug_assert_eq!(base % 16, 0);
        self.words[base / 64] |= (lane as u64) << (base % 64);
    }

    #[inline(always)]
    pub fn and(&self, other: &Self) -> Self {
        let mut out = *self;
        for (w, o) in out.words.iter_mut().zip(other.words.iter()) {
            *w &= *o;
        }
        out
    }

    #[inline(always)]
    pub fn or(&self, other: &Self) -> Self {
        let mut out = *self;
        for (w, o) in out.words.iter_mut().zip(other.words.iter()) {
            *w |= *o;
        }
        out
    }

    /// Popcount of `self & other` without materialising the intersection.
    #[inline(always)]
    pub fn intersection_count(&self, other: &Self) -> u32 {
        self.words
            .iter()
            .zip(other.words.iter())
            .map(|(a, b)| (a & b).count_ones())
            .sum()
    }

    #[inline(always)]
    pub fn count(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(a, b)| a & !b == 0)
    }

    /// Set slots in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..CANONICAL_WIDTH).filter(move |slot| self.contains(*slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_contains_count() {
        let bits = PositionBits::from_slots([0, 63, 64, 199]);
        assert!(bits.contains(0));
        assert!(bits.contains(63));
        assert!(bits.contains(64));
        assert!(bits.contains(199));
        assert!(!bits.contains(1));
        assert!(!bits.contains(200), "out of range slots are never set");
        assert_eq!(bits.count(), 4);
    }

    #[test]
    fn test_full_has_every_slot() {
        let full = PositionBits::full();
        assert_eq!(full.count() as usize, CANONICAL_WIDTH);
        assert_eq!(full.iter().count(), CANONICAL_WIDTH);
    }

    #[test]
    fn test_intersection_and_subset() {
        let a = PositionBits::from_slots([1, 2, 3, 100]);
        let b = PositionBits::from_slots([2, 3, 4, 100, 150]);
        assert_eq!(a.intersection_count(&b), 3);
        assert_eq!(a.and(&b).count(), 3);
        assert_eq!(a.or(&b).count(), 6);
        assert!(a.and(&b).is_subset_of(&a));
        assert!(!a.is_subset_of(&b));
        assert!(PositionBits::empty().is_subset_of(&a));
        assert!(PositionBits::empty().is_empty());
    }

    #[test]
    fn test_lane_packing() {
        let mut bits = PositionBits::empty();
        bits.or_lane32(32, 0b101);
        bits.or_lane16(176, 0x8001);
        assert!(bits.contains(32));
        assert!(bits.contains(34));
        assert!(!bits.contains(33));
        assert!(bits.contains(176));
        assert!(bits.contains(191));
        assert_eq!(bits.count(), 4);
    }
}
