#![cfg(feature = "fuzzing")]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use abscan::shard::{read_shard_bytes, write_shard, MAGIC};
use abscan::{EncodedSequence, ShardData, SourceId};

#[test]
fn malformed_bytes_do_not_panic_decode_paths() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..2_000 {
        let len = rng.gen_range(0..4096usize);
        let mut data = vec![0u8; len];
        rng.fill(data.as_mut_slice());
        // Give half the inputs a valid magic so the header checks run.
        if len >= MAGIC.len() && rng.gen_bool(0.5) {
            data[..MAGIC.len()].copy_from_slice(&MAGIC);
        }

        let _ = read_shard_bytes(&data);
        let _ = abscan::encoding::encode_numbering_text(&String::from_utf8_lossy(&data));
    }
}

#[test]
fn mutated_shards_fail_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seed.shard");
    let data = ShardData::new(
        vec![EncodedSequence::sentinel(); 16],
        (0..16).map(|l| SourceId::new(0, l)).collect(),
    )
    .unwrap();
    write_shard(&path, &data, 3).unwrap();
    let seed = std::fs::read(&path).unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..2_000 {
        let mut bytes = seed.clone();
        let flips = rng.gen_range(1..4);
        for _ in 0..flips {
            let at = rng.gen_range(0..bytes.len());
            bytes[at] ^= rng.gen_range(1..=255u8);
        }
        if rng.gen_bool(0.2) {
            bytes.truncate(rng.gen_range(0..bytes.len()));
        }
        if let Ok(decoded) = read_shard_bytes(&bytes) {
            // Anything that still decodes must decode to the original.
            assert_eq!(decoded, data);
        }
    }
}
