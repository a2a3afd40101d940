//! Identity kernel benchmarks
//!
//! Run with: cargo bench --bench kernel

use abscan::kernel::{reference_scores, score_batch};
use abscan::simd::match_bits;
use abscan::{EncodedSequence, RegionSet, CANONICAL_WIDTH};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;

const ALPHABET: &[u8] = b"ACDEFGHIKLMNPQRSTVWY";

fn random_sequence() -> EncodedSequence {
    let mut rng = rand::thread_rng();
    let mut codes = [0i8; CANONICAL_WIDTH];
    for slot in codes.iter_mut() {
        if rng.gen_bool(0.6) {
            *slot = ALPHABET[rng.gen_range(0..ALPHABET.len())] as i8;
        }
    }
    EncodedSequence::from_codes(&codes).unwrap()
}

fn bench_match_bits(c: &mut Criterion) {
    let a = random_sequence();
    let b = random_sequence();

    c.bench_function("match_bits", |bencher| {
        bencher.iter(|| match_bits(black_box(a.codes()), black_box(b.codes())))
    });
}

fn bench_score_batch(c: &mut Criterion) {
    let regions = RegionSet::standard();
    let queries: Vec<_> = (0..4).map(|_| random_sequence()).collect();

    let mut group = c.benchmark_group("score_batch");

    for targets in [1_000usize, 10_000, 100_000] {
        let shard: Vec<_> = (0..targets).map(|_| random_sequence()).collect();
        group.throughput(Throughput::Elements((targets * queries.len()) as u64));

        group.bench_with_input(BenchmarkId::from_parameter(targets), &shard, |bencher, shard| {
            bencher.iter(|| score_batch(black_box(&queries), black_box(shard), &regions))
        });
    }

    group.finish();
}

fn bench_reference(c: &mut Criterion) {
    let regions = RegionSet::standard();
    let queries: Vec<_> = (0..4).map(|_| random_sequence()).collect();
    let shard: Vec<_> = (0..1_000).map(|_| random_sequence()).collect();

    c.bench_function("reference_scores_1000", |bencher| {
        bencher.iter(|| reference_scores(black_box(&queries), black_box(&shard), &regions))
    });
}

criterion_group!(benches, bench_match_bits, bench_score_batch, bench_reference);
criterion_main!(benches);
