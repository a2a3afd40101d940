use std::path::{Path, PathBuf};

use abscan::shard::write_shard;
use abscan::{
    EncodedSequence, Encoder, EncodingError, EncodingMode, Hit, NumberingInput, Partition,
    PositionLabel, Region, ResultCount, SearchConfig, SearchEngine, ShardData, SourceId,
    CANONICAL_WIDTH,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

const ALPHABET: &[u8] = b"ACDEFGHIKLMNPQRSTVWY";

fn random_sequence(rng: &mut StdRng, residues: &[u8], fill: f64) -> EncodedSequence {
    let mut codes = [0i8; CANONICAL_WIDTH];
    for slot in codes.iter_mut() {
        if rng.gen_bool(fill) {
            *slot = residues[rng.gen_range(0..residues.len())] as i8;
        }
    }
    EncodedSequence::from_codes(&codes).unwrap()
}

fn write_records(dir: &Path, name: &str, records: &[(EncodedSequence, SourceId)]) -> PathBuf {
    let path = dir.join(name);
    let data = ShardData::new(
        records.iter().map(|(s, _)| *s).collect(),
        records.iter().map(|(_, id)| *id).collect(),
    )
    .unwrap();
    write_shard(&path, &data, 3).unwrap();
    path
}

/// Split `records` into consecutive shards of the given sizes.
fn write_split(
    dir: &Path,
    tag: &str,
    records: &[(EncodedSequence, SourceId)],
    sizes: &[usize],
) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let mut start = 0;
    for (i, size) in sizes.iter().enumerate() {
        let end = start + size;
        paths.push(write_records(dir, &format!("{tag}-{i}.shard"), &records[start..end]));
        start = end;
    }
    assert_eq!(start, records.len());
    paths
}

fn config() -> SearchConfig {
    SearchConfig {
        kernel_threads: 2,
        loader_threads: 2,
        poll_interval_ms: 1,
        ..SearchConfig::default()
    }
}

fn all_hits(engine: &SearchEngine, n_queries: usize) -> Vec<Vec<Hit>> {
    let mut out = Vec::new();
    for q in 0..n_queries {
        for r in 0..engine.regions().len() {
            out.push(engine.get_results(q, r, ResultCount::All).unwrap().to_vec());
        }
    }
    out
}

#[test]
fn scenario_a_identical_vectors_score_one() {
    let mut rng = StdRng::seed_from_u64(1);
    let full = random_sequence(&mut rng, ALPHABET, 1.0);

    let dir = tempdir().unwrap();
    let other = random_sequence(&mut rng, ALPHABET, 0.5);
    let shard = write_records(
        dir.path(),
        "a.shard",
        &[(other, SourceId::new(0, 0)), (full, SourceId::new(0, 1))],
    );

    let mut engine = SearchEngine::with_shards(config(), vec![shard]).unwrap();
    engine.search(&[full], 1).unwrap();

    for region in 0..3 {
        let hits = engine.get_results(0, region, ResultCount::All).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, SourceId::new(0, 1));
        assert_eq!(hits[0].score, 1.0, "region {region}");
    }
}

#[test]
fn scenario_b_single_shard_keep_three() {
    let mut rng = StdRng::seed_from_u64(2);
    let dir = tempdir().unwrap();
    let records: Vec<_> = (0..5)
        .map(|i| (random_sequence(&mut rng, b"ACD", 0.8), SourceId::new(7, i)))
        .collect();
    let shard = write_records(dir.path(), "b.shard", &records);

    let query = random_sequence(&mut rng, b"ACD", 0.8);
    let mut engine = SearchEngine::with_shards(config(), vec![shard]).unwrap();
    engine.search(&[query], 3).unwrap();

    for region in 0..3 {
        let hits = engine.get_results(0, region, ResultCount::All).unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }
}

#[test]
fn scenario_c_two_shards_equal_one_shard() {
    let mut rng = StdRng::seed_from_u64(3);
    let dir = tempdir().unwrap();
    let records: Vec<_> = (0..6)
        .map(|i| (random_sequence(&mut rng, b"AC", 0.7), SourceId::new(1, i)))
        .collect();
    let queries: Vec<_> = (0..2).map(|_| random_sequence(&mut rng, b"AC", 0.7)).collect();

    let one = write_split(dir.path(), "one", &records, &[6]);
    let two = write_split(dir.path(), "two", &records, &[3, 3]);

    let mut single = SearchEngine::with_shards(config(), one).unwrap();
    single.search(&queries, 2).unwrap();
    let mut split = SearchEngine::with_shards(config(), two).unwrap();
    split.search(&queries, 2).unwrap();

    assert_eq!(all_hits(&single, 2), all_hits(&split, 2));
}

#[test]
fn scenario_d_unknown_label() {
    let label: PositionLabel = "130".parse().unwrap();
    let pairs = [(label, 'A')];

    let strict = Encoder::new(EncodingMode::Strict);
    assert_eq!(
        strict.encode(NumberingInput::Pairs(&pairs)),
        Err(EncodingError::UnknownPosition(label))
    );

    let lenient = Encoder::new(EncodingMode::Lenient);
    let record = lenient.encode(NumberingInput::Pairs(&pairs)).unwrap();
    assert!(record.sequence.is_sentinel());
    assert_eq!(record.sequence.codes(), &[0i8; CANONICAL_WIDTH]);
    assert_eq!(record.partition, Partition::Unusual);
}

#[test]
fn shard_boundaries_do_not_change_results() {
    let mut rng = StdRng::seed_from_u64(4);
    let dir = tempdir().unwrap();

    // Small alphabet and low fill produce plenty of tied scores.
    let records: Vec<_> = (0..120)
        .map(|i| (random_sequence(&mut rng, b"AC", 0.3), SourceId::new(i % 3, i)))
        .collect();
    let queries: Vec<_> = (0..3).map(|_| random_sequence(&mut rng, b"AC", 0.3)).collect();

    let splits: [&[usize]; 6] = [
        &[120],
        &[60, 60],
        &[20, 50, 1, 49],
        &[15; 8],
        &[1, 119],
        &[4, 2, 114],
    ];
    let mut baseline: Option<Vec<Vec<Hit>>> = None;

    for (i, sizes) in splits.iter().enumerate() {
        let shards = write_split(dir.path(), &format!("split{i}"), &records, sizes);
        let mut engine = SearchEngine::with_shards(config(), shards).unwrap();
        engine.search(&queries, 10).unwrap();
        let hits = all_hits(&engine, queries.len());
        assert!(hits.iter().all(|list| list.len() == 10));

        match &baseline {
            None => baseline = Some(hits),
            Some(expected) => assert_eq!(&hits, expected, "split {sizes:?}"),
        }
    }
}

#[test]
fn custom_region_search() {
    let mut rng = StdRng::seed_from_u64(5);
    let dir = tempdir().unwrap();
    let records: Vec<_> = (0..10)
        .map(|i| (random_sequence(&mut rng, b"AC", 0.9), SourceId::new(0, i)))
        .collect();
    let shard = write_records(dir.path(), "c.shard", &records);

    let config = SearchConfig {
        regions: vec![Region::Custom(vec!["111A".into(), "111B".into(), "112A".into()])],
        length_matched: vec![false],
        ..config()
    };
    let mut engine = SearchEngine::with_shards(config, vec![shard]).unwrap();
    engine.search(&[records[4].0], 9).unwrap();

    let hits = engine.get_results(0, 0, ResultCount::Top(3)).unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].score, 1.0);
}

#[test]
fn small_first_shard_does_not_limit_results() {
    let dir = tempdir().unwrap();
    let query = EncodedSequence::from_codes(&[b'A' as i8; CANONICAL_WIDTH]).unwrap();
    // Record i agrees with the query on its first i * 10 slots.
    let records: Vec<_> = (0..6)
        .map(|i| {
            let mut codes = [b'C' as i8; CANONICAL_WIDTH];
            codes[..i * 10].fill(b'A' as i8);
            (EncodedSequence::from_codes(&codes).unwrap(), SourceId::new(0, i as i32))
        })
        .collect();

    let one = write_split(dir.path(), "whole", &records, &[6]);
    let split = write_split(dir.path(), "tiny-first", &records, &[1, 5]);

    let mut single = SearchEngine::with_shards(config(), one).unwrap();
    single.search(&[query], 2).unwrap();
    let mut tiny_first = SearchEngine::with_shards(config(), split).unwrap();
    tiny_first.search(&[query], 2).unwrap();

    let expected = single.get_results(0, 0, ResultCount::All).unwrap();
    assert_eq!(expected.len(), 2);
    assert_eq!(expected[0].source, SourceId::new(0, 5));
    assert_eq!(expected[1].source, SourceId::new(0, 4));
    assert_eq!(all_hits(&single, 1), all_hits(&tiny_first, 1));

    // Asking for more hits than records returns every record.
    tiny_first.search(&[query], 50).unwrap();
    assert_eq!(tiny_first.get_results(0, 0, ResultCount::All).unwrap().len(), 6);
}
