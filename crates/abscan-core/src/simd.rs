//! SIMD byte-compare kernels
//!
//! Turns encoded residue vectors into [`PositionBits`]: which slots hold a
//! residue, and which slots hold the *same* residue in two vectors. These
//! are the elementwise equality and masking steps of the identity kernel;
//! the region contraction is then a popcount over the resulting bitsets.
//!
//! # Architecture Selection
//!
//! | Platform     | ISA   | Width              | Functions used                           |
//! |--------------|-------|--------------------|------------------------------------------|
//! | Apple M1+    | NEON  | 128-bit (16×i8)    | `vceqq_s8`, `vtstq_s8`, `vaddv_u8`       |
//! | x86_64+AVX2  | AVX2  | 256-bit (32×i8)    | `_mm256_cmpeq_epi8`, `_mm256_movemask_epi8` |
//! | other        | scalar| 1×i8               | plain loop                               |
//!
//! 200 slots = 6×32 (AVX2) or 12×16 (NEON) lanes plus an 8-slot scalar tail.

use crate::bits::PositionBits;
use crate::numbering::CANONICAL_WIDTH;

type Codes = [i8; CANONICAL_WIDTH];

// ============================================================================
// aarch64 NEON intrinsics
// ============================================================================

/// Collapse a 16-lane all-ones/all-zeros compare result into a 16-bit mask.
#[cfg(target_arch = "aarch64")]
#[inline(always)]
unsafe fn movemask_neon(v: std::arch::aarch64::uint8x16_t) -> u16 {
    use std::arch::aarch64::*;

    const WEIGHTS: [u8; 16] = [1, 2, 4, 8, 16, 32, 64, 128, 1, 2, 4, 8, 16, 32, 64, 128];
    let weights = vld1q_u8(WEIGHTS.as_ptr());
    let masked = vandq_u8(v, weights);

    // Each half holds distinct powers of two, so the horizontal add is an OR.
    let lo = vaddv_u8(vget_low_u8(masked)) as u16;
    let hi = vaddv_u8(vget_high_u8(masked)) as u16;
    lo | (hi << 8)
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
unsafe fn match_bits_neon(a: &Codes, b: &Codes) -> PositionBits {
    use std::arch::aarch64::*;

    let chunks = CANONICAL_WIDTH / 16;
    let mut bits = PositionBits::empty();

    for i in 0..chunks {
        let va = vld1q_s8(a.as_ptr().add(i * 16));
        let vb = vld1q_s8(b.as_ptr().add(i * 16));
        let eq = vceqq_s8(va, vb);
        let present = vtstq_s8(va, va);
        bits.or_lane16(i * 16, movemask_neon(vandq_u8(eq, present)));
    }

    scalar_match_tail(a, b, chunks * 16, &mut bits);
    bits
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
unsafe fn nonzero_bits_neon(a: &Codes) -> PositionBits {
    use std::arch::aarch64::*;

    let chunks = CANONICAL_WIDTH / 16;
    let mut bits = PositionBits::empty();

    for i in 0..chunks {
        let va = vld1q_s8(a.as_ptr().add(i * 16));
        bits.or_lane16(i * 16, movemask_neon(vtstq_s8(va, va)));
    }

    scalar_nonzero_tail(a, chunks * 16, &mut bits);
    bits
}

// ============================================================================
// x86_64 AVX2 intrinsics (runtime feature detection)
// ============================================================================

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn match_bits_avx2(a: &Codes, b: &Codes) -> PositionBits {
    use std::arch::x86_64::*;

    let chunks = CANONICAL_WIDTH / 32;
    let zero = _mm256_setzero_si256();
    let mut bits = PositionBits::empty();

    for i in 0..chunks {
        let va = _mm256_loadu_si256(a.as_ptr().add(i * 32) as *const __m256i);
        let vb = _mm256_loadu_si256(b.as_ptr().add(i * 32) as *const __m256i);
        let eq = _mm256_cmpeq_epi8(va, vb);
        let gap = _mm256_cmpeq_epi8(va, zero);
        // !gap & eq
        let hit = _mm256_andnot_si256(gap, eq);
        bits.or_lane32(i * 32, _mm256_movemask_epi8(hit) as u32);
    }

    scalar_match_tail(a, b, chunks * 32, &mut bits);
    bits
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn nonzero_bits_avx2(a: &Codes) -> PositionBits {
    use std::arch::x86_64::*;

    let chunks = CANONICAL_WIDTH / 32;
    let zero = _mm256_setzero_si256();
    let mut bits = PositionBits::empty();

    for i in 0..chunks {
        let va = _mm256_loadu_si256(a.as_ptr().add(i * 32) as *const __m256i);
        let gap = _mm256_movemask_epi8(_mm256_cmpeq_epi8(va, zero)) as u32;
        bits.or_lane32(i * 32, !gap);
    }

    scalar_nonzero_tail(a, chunks * 32, &mut bits);
    bits
}

// ============================================================================
// Scalar fallback
// ============================================================================

#[inline(always)]
fn scalar_match_tail(a: &Codes, b: &Codes, start: usize, bits: &mut PositionBits) {
    for slot in start..CANONICAL_WIDTH {
        if a[slot] != 0 && a[slot] == b[slot] {
            bits.insert(slot);
        }
    }
}

#[inline(always)]
fn scalar_nonzero_tail(a: &Codes, start: usize, bits: &mut PositionBits) {
    for slot in start..CANONICAL_WIDTH {
        if a[slot] != 0 {
            bits.insert(slot);
        }
    }
}

#[inline(always)]
pub(crate) fn match_bits_scalar(a: &Codes, b: &Codes) -> PositionBits {
    let mut bits = PositionBits::empty();
    scalar_match_tail(a, b, 0, &mut bits);
    bits
}

#[inline(always)]
pub(crate) fn nonzero_bits_scalar(a: &Codes) -> PositionBits {
    let mut bits = PositionBits::empty();
    scalar_nonzero_tail(a, 0, &mut bits);
    bits
}

// ============================================================================
// Public dispatch functions
// ============================================================================

/// Slots where `a` and `b` carry the same residue.
///
/// Gaps never match: a slot is set only if it is nonzero in both vectors.
#[inline(always)]
pub fn match_bits(a: &Codes, b: &Codes) -> PositionBits {
    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { match_bits_neon(a, b) };
    }

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            return unsafe { match_bits_avx2(a, b) };
        }
    }

    #[allow(unreachable_code)]
    match_bits_scalar(a, b)
}

/// Slots holding a residue (nonzero code).
#[inline(always)]
pub fn nonzero_bits(a: &Codes) -> PositionBits {
    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { nonzero_bits_neon(a) };
    }

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            return unsafe { nonzero_bits_avx2(a) };
        }
    }

    #[allow(unreachable_code)]
    nonzero_bits_scalar(a)
}
