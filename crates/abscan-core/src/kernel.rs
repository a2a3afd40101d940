//! Region-weighted identity kernel
//!
//! For region `r` with mask `m_r`:
//!
//! ```text
//! overlap = |{p ∈ m_r : q[p] == t[p] ≠ 0}|
//! len_q   = |{p ∈ m_r : q[p] ≠ 0}|          len_t likewise
//! score   = (overlap / len_q + overlap / len_t) / 2
//! ```
//!
//! The score is 0 when either length is 0, and 0 when the region is
//! length-matched and `len_q != len_t`. No NaN ever leaves this module.
//!
//! Two variants are provided and kept in lock-step by property tests:
//!
//! - [`reference_scores`]: a plain per-position loop, the executable definition.
//! - [`score_batch`]: the production path. Equality and masking are done by
//!   the SIMD byte-compare kernels into bitsets, the contraction against the
//!   stacked region masks is an AND + popcount, and targets are spread over
//!   the calling rayon pool.

use rayon::prelude::*;

use crate::bits::PositionBits;
use crate::encoding::EncodedSequence;
use crate::numbering::CANONICAL_WIDTH;
use crate::regions::RegionSet;
use crate::simd;

/// Targets handed to one rayon task at minimum
const MIN_TARGETS_PER_TASK: usize = 1024;

/// Identity from region counts. Shared by both variants so they agree bit-for-bit.
#[inline(always)]
pub fn identity_from_counts(overlap: u32, len_q: u32, len_t: u32, length_matched: bool) -> f32 {
    if len_q == 0 || len_t == 0 {
        return 0.0;
    }
    if length_matched && len_q != len_t {
        return 0.0;
    }
    let overlap = overlap as f32;
    (overlap / len_q as f32 + overlap / len_t as f32) / 2.0
}

/// Dense `queries × targets × regions` score tensor.
///
/// Stored target-major (`[target][query][region]`) so each target's block
/// is written by a single worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreTensor {
    n_queries: usize,
    n_targets: usize,
    n_regions: usize,
    data: Vec<f32>,
}

impl ScoreTensor {
    fn zeroed(n_queries: usize, n_targets: usize, n_regions: usize) -> Self {
        Self {
            n_queries,
            n_targets,
            n_regions,
            data: vec![0.0; n_queries * n_targets * n_regions],
        }
    }

    pub fn n_queries(&self) -> usize {
        self.n_queries
    }

    pub fn n_targets(&self) -> usize {
        self.n_targets
    }

    pub fn n_regions(&self) -> usize {
        self.n_regions
    }

    #[inline(always)]
    fn offset(&self, query: usize, target: usize, region: usize) -> usize {
        (target * self.n_queries + query) * self.n_regions + region
    }

    #[inline(always)]
    pub fn get(&self, query: usize, target: usize, region: usize) -> f32 {
        self.data[self.offset(query, target, region)]
    }

    fn block_len(&self) -> usize {
        self.n_queries * self.n_regions
    }
}

/// Reference kernel: straightforward loops over every position.
pub fn reference_scores(
    queries: &[EncodedSequence],
    targets: &[EncodedSequence],
    regions: &RegionSet,
) -> ScoreTensor {
    let mut tensor = ScoreTensor::zeroed(queries.len(), targets.len(), regions.len());

    for (t, target) in targets.iter().enumerate() {
        for (q, query) in queries.iter().enumerate() {
            for (r, (mask, length_matched)) in regions.iter().enumerate() {
                let (mut overlap, mut len_q, mut len_t) = (0u32, 0u32, 0u32);
                for slot in 0..CANONICAL_WIDTH {
                    if !mask.contains(slot) {
                        continue;
                    }
                    let a = query.codes()[slot];
                    let b = target.codes()[slot];
                    if a != 0 {
                        len_q += 1;
                    }
                    if b != 0 {
                        len_t += 1;
                    }
                    if a != 0 && b != 0 && a == b {
                        overlap += 1;
                    }
                }
                let offset = tensor.offset(q, t, r);
                tensor.data[offset] = identity_from_counts(overlap, len_q, len_t, length_matched);
            }
        }
    }

    tensor
}

/// Per-query state reused across every target of a batch.
struct PreparedQuery<'a> {
    codes: &'a [i8; CANONICAL_WIDTH],
    region_len: Vec<u32>,
}

/// Data-parallel kernel; runs on the current rayon pool.
pub fn score_batch(
    queries: &[EncodedSequence],
    targets: &[EncodedSequence],
    regions: &RegionSet,
) -> ScoreTensor {
    let mut tensor = ScoreTensor::zeroed(queries.len(), targets.len(), regions.len());
    let block = tensor.block_len();
    if block == 0 || targets.is_empty() {
        return tensor;
    }

    let masks: Vec<(PositionBits, bool)> = regions
        .iter()
        .map(|(mask, length_matched)| (*mask.bits(), length_matched))
        .collect();

    let prepared: Vec<PreparedQuery<'_>> = queries
        .iter()
        .map(|query| {
            let occupied = simd::nonzero_bits(query.codes());
            PreparedQuery {
                codes: query.codes(),
                region_len: masks
                    .iter()
                    .map(|(bits, _)| occupied.intersection_count(bits))
                    .collect(),
            }
        })
        .collect();

    tensor
        .data
        .par_chunks_mut(block)
        .with_min_len(MIN_TARGETS_PER_TASK)
        .zip(targets.par_iter())
        .for_each(|(out, target)| {
            let target_codes = target.codes();
            let occupied = simd::nonzero_bits(target_codes);
            let mut target_len = [0u32; 8];
            let mut target_len_vec;
            let target_len: &mut [u32] = if masks.len() <= target_len.len() {
                &mut target_len[..masks.len()]
            } else {
                target_len_vec = vec![0u32; masks.len()];
                &mut target_len_vec
            };
            for (len, (bits, _)) in target_len.iter_mut().zip(masks.iter()) {
                *len = occupied.intersection_count(bits);
            }

            for (q, query) in prepared.iter().enumerate() {
                let matched = simd::match_bits(query.codes, target_codes);
                let row = &mut out[q * masks.len()..(q + 1) * masks.len()];
                for (r, (bits, length_matched)) in masks.iter().enumerate() {
                    row[r] = identity_from_counts(
                        matched.intersection_count(bits),
                        query.region_len[r],
                        target_len[r],
                        *length_matched,
                    );
                }
            }
        });

    tensor
}

/// Score one pair under every region of the set.
pub fn pair_scores(a: &EncodedSequence, b: &EncodedSequence, regions: &RegionSet) -> Vec<f32> {
    let matched = simd::match_bits(a.codes(), b.codes());
    let occ_a = a.occupied();
    let occ_b = b.occupied();
    regions
        .iter()
        .map(|(mask, length_matched)| {
            identity_from_counts(
                matched.intersection_count(mask.bits()),
                occ_a.intersection_count(mask.bits()),
                occ_b.intersection_count(mask.bits()),
                length_matched,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regions::Region;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const ALPHABET: &[u8] = b"ACDEFGHIKLMNPQRSTVWY";

    fn random_sequence(rng: &mut StdRng) -> EncodedSequence {
        let mut codes = [0i8; CANONICAL_WIDTH];
        for slot in codes.iter_mut() {
            if rng.gen_bool(0.7) {
                *slot = ALPHABET[rng.gen_range(0..4)] as i8;
            }
        }
        EncodedSequence::from_codes(&codes).unwrap()
    }

    fn sequence_with(slots: &[(usize, u8)]) -> EncodedSequence {
        let mut codes = [0i8; CANONICAL_WIDTH];
        for (slot, residue) in slots {
            codes[*slot] = *residue as i8;
        }
        EncodedSequence::from_codes(&codes).unwrap()
    }

    #[test]
    fn test_identity_from_counts_edges() {
        assert_eq!(identity_from_counts(0, 0, 5, false), 0.0);
        assert_eq!(identity_from_counts(0, 5, 0, false), 0.0);
        assert_eq!(identity_from_counts(0, 0, 0, true), 0.0);
        assert_eq!(identity_from_counts(4, 4, 4, true), 1.0);
        assert_eq!(identity_from_counts(4, 4, 5, true), 0.0);
        assert!((identity_from_counts(4, 4, 8, false) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_identical_sequences_score_one() {
        let mut rng = StdRng::seed_from_u64(1);
        let seq = random_sequence(&mut rng);
        let scores = pair_scores(&seq, &seq, &RegionSet::standard());
        assert_eq!(scores, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_batch_matches_reference() {
        let mut rng = StdRng::seed_from_u64(99);
        let queries: Vec<_> = (0..3).map(|_| random_sequence(&mut rng)).collect();
        let mut targets: Vec<_> = (0..2500).map(|_| random_sequence(&mut rng)).collect();
        targets[17] = queries[1];
        targets[18] = EncodedSequence::sentinel();

        let regions = RegionSet::new(
            &[Region::Whole, Region::AllCdrs, Region::Cdr3, Region::Cdr1],
            &[false, true, true, false],
        )
        .unwrap();

        let fast = score_batch(&queries, &targets, &regions);
        let slow = reference_scores(&queries, &targets, &regions);
        assert_eq!(fast, slow);
        assert_eq!(fast.get(1, 17, 0), 1.0);
        for r in 0..regions.len() {
            assert_eq!(fast.get(0, 18, r), 0.0, "sentinel target scores 0");
        }
    }

    #[test]
    fn test_length_match_forces_zero() {
        // Same residues on the shared CDR3 slots, but the target has one extra.
        let cdr3_a = "105".parse::<crate::numbering::PositionLabel>().unwrap().canonical_index().unwrap();
        let cdr3_b = "106".parse::<crate::numbering::PositionLabel>().unwrap().canonical_index().unwrap();
        let cdr3_c = "107".parse::<crate::numbering::PositionLabel>().unwrap().canonical_index().unwrap();

        let q = sequence_with(&[(0, b'Q'), (cdr3_a, b'A'), (cdr3_b, b'R')]);
        let t = sequence_with(&[(0, b'Q'), (cdr3_a, b'A'), (cdr3_b, b'R'), (cdr3_c, b'D')]);

        let strict = RegionSet::new(&[Region::Cdr3], &[true]).unwrap();
        let loose = RegionSet::new(&[Region::Cdr3], &[false]).unwrap();
        assert_eq!(pair_scores(&q, &t, &strict), vec![0.0]);

        let expected = (1.0 + 2.0 / 3.0) / 2.0;
        assert!((pair_scores(&q, &t, &loose)[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_empty_region_scores_zero() {
        // Neither sequence has a residue inside CDR3.
        let q = sequence_with(&[(0, b'Q'), (1, b'V')]);
        let t = sequence_with(&[(0, b'Q'), (1, b'V')]);
        let scores = pair_scores(&q, &t, &RegionSet::standard());
        assert_eq!(scores[0], 1.0);
        assert_eq!(scores[1], 0.0);
        assert_eq!(scores[2], 0.0);
        assert!(scores.iter().all(|s| !s.is_nan()));
    }

    #[test]
    fn test_empty_inputs() {
        let regions = RegionSet::standard();
        let tensor = score_batch(&[], &[EncodedSequence::sentinel()], &regions);
        assert_eq!(tensor.n_queries(), 0);
        let tensor = score_batch(&[EncodedSequence::sentinel()], &[], &regions);
        assert_eq!(tensor.n_targets(), 0);
    }
}
