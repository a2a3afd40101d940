//! Shard set builder
//!
//! Encodes numbered records and writes them into the
//! `<root>/<chain>/<species>/` layout the search engine reads. Normal
//! records are cut into shards of at most `max_records_per_shard`; unusual
//! (sentinel) records are collected per bucket and written on
//! [`DatabaseBuilder::finish`]. Source names are kept in `sources.json`
//! at the root, keyed by file id.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{bucket_dir, normalize_species, shard_file_name};
use crate::encoding::{
    EncodedRecord, Encoder, EncodingError, EncodingMode, NumberingInput, Partition,
};
use crate::numbering::ChainClass;
use crate::query::NumberedSequence;
use crate::shard::{ShardError, ShardWriter, SourceId, DEFAULT_ZSTD_LEVEL};

pub const SOURCES_FILE: &str = "sources.json";

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Shard error: {0}")]
    Shard(#[from] ShardError),

    #[error("Invalid builder configuration: {0}")]
    Config(String),

    #[error("Source registry error: {0}")]
    Registry(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    pub max_records_per_shard: usize,
    pub encoding_mode: EncodingMode,
    pub zstd_level: i32,
    /// Store species under their canonical names (`Human`, `Mouse`, ...)
    pub normalize_species: bool,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            max_records_per_shard: 4_000_000,
            encoding_mode: EncodingMode::Lenient,
            zstd_level: DEFAULT_ZSTD_LEVEL,
            normalize_species: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    pub shards: Vec<PathBuf>,
    pub normal_records: u64,
    pub unusual_records: u64,
}

struct Bucket {
    dir: PathBuf,
    normal: Option<ShardWriter>,
    unusual: Option<ShardWriter>,
}

impl Bucket {
    fn writer(&mut self, partition: Partition, level: i32) -> &mut ShardWriter {
        let dir = &self.dir;
        let slot = match partition {
            Partition::Normal => &mut self.normal,
            Partition::Unusual => &mut self.unusual,
        };
        slot.get_or_insert_with(|| {
            ShardWriter::with_level(dir.join(shard_file_name(partition)), level)
        })
    }

    /// Detach the `partition` writer once it holds `max` records.
    fn take_full(&mut self, partition: Partition, max: usize) -> Option<ShardWriter> {
        let slot = match partition {
            Partition::Normal => &mut self.normal,
            Partition::Unusual => &mut self.unusual,
        };
        if slot.as_ref().is_some_and(|w| w.len() >= max as u64) {
            slot.take()
        } else {
            None
        }
    }
}

pub struct DatabaseBuilder {
    root: PathBuf,
    config: BuilderConfig,
    encoder: Encoder,
    buckets: HashMap<(ChainClass, String), Bucket>,
    sources: BTreeMap<i32, String>,
    summary: BuildSummary,
}

impl DatabaseBuilder {
    /// Open (or create) a database root. Existing `sources.json` entries are kept.
    pub fn new<P: AsRef<Path>>(root: P, config: BuilderConfig) -> Result<Self, BuildError> {
        if config.max_records_per_shard == 0 {
            return Err(BuildError::Config(
                "max_records_per_shard must be at least 1".to_string(),
            ));
        }
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        let registry = root.join(SOURCES_FILE);
        let sources = if registry.exists() {
            serde_json::from_str(&std::fs::read_to_string(&registry)?)?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            root,
            encoder: Encoder::new(config.encoding_mode),
            config,
            buckets: HashMap::new(),
            sources,
            summary: BuildSummary::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register a source file and return its id.
    pub fn add_source(&mut self, name: &str) -> i32 {
        let id = self.sources.keys().next_back().map_or(0, |last| last + 1);
        self.sources.insert(id, name.to_string());
        id
    }

    pub fn sources(&self) -> &BTreeMap<i32, String> {
        &self.sources
    }

    /// Encode and store one record. Returns the partition it went to.
    pub fn add_record(
        &mut self,
        chain: ChainClass,
        species: &str,
        input: NumberingInput<'_>,
        id: SourceId,
    ) -> Result<Partition, BuildError> {
        let record = self.encoder.encode(input)?;
        self.store(chain, species, record, id)
    }

    /// Store the output of a numbering service.
    ///
    /// A failed numbering is passed as `None` and handled according to the
    /// encoding mode; `chain` is only used in that case, otherwise the
    /// chain reported by the numbering wins.
    pub fn add_numbered(
        &mut self,
        chain: ChainClass,
        species: &str,
        numbered: Option<&NumberedSequence>,
        id: SourceId,
    ) -> Result<Partition, BuildError> {
        match numbered {
            Some(numbered) => self.add_record(
                numbered.chain,
                species,
                NumberingInput::Pairs(&numbered.positions),
                id,
            ),
            None => {
                let failure = EncodingError::NumberingFailed(format!(
                    "file {} line {}",
                    id.file_id, id.line
                ));
                let record = self.encoder.resolve(Err(failure))?;
                self.store(chain, species, record, id)
            }
        }
    }

    fn store(
        &mut self,
        chain: ChainClass,
        species: &str,
        record: EncodedRecord,
        id: SourceId,
    ) -> Result<Partition, BuildError> {
        let species = if self.config.normalize_species {
            normalize_species(species).to_string()
        } else {
            species.to_string()
        };

        let level = self.config.zstd_level;
        let root = &self.root;
        let bucket = self
            .buckets
            .entry((chain, species))
            .or_insert_with_key(|(chain, species)| Bucket {
                dir: bucket_dir(root, *chain, species),
                normal: None,
                unusual: None,
            });

        bucket.writer(record.partition, level).push(&record.sequence, id);
        match record.partition {
            Partition::Normal => self.summary.normal_records += 1,
            Partition::Unusual => self.summary.unusual_records += 1,
        }

        let max = self.config.max_records_per_shard;
        if let Some(writer) = bucket.take_full(record.partition, max) {
            let path = flush(&bucket.dir, writer)?;
            self.summary.shards.push(path);
        }

        Ok(record.partition)
    }

    /// Write every open shard and the source registry.
    pub fn finish(mut self) -> Result<BuildSummary, BuildError> {
        let mut buckets: Vec<_> = self.buckets.drain().collect();
        buckets.sort_by(|a, b| a.0.cmp(&b.0));

        for (_, bucket) in buckets {
            for writer in [bucket.normal, bucket.unusual].into_iter().flatten() {
                if writer.is_empty() {
                    continue;
                }
                let path = flush(&bucket.dir, writer)?;
                self.summary.shards.push(path);
            }
        }

        let registry = self.root.join(SOURCES_FILE);
        let tmp = self.root.join(format!("{SOURCES_FILE}.tmp"));
        std::fs::write(&tmp, serde_json::to_vec_pretty(&self.sources)?)?;
        std::fs::rename(&tmp, &registry)?;

        tracing::info!(
            "build finished: {} shards, {} normal and {} unusual records",
            self.summary.shards.len(),
            self.summary.normal_records,
            self.summary.unusual_records
        );
        Ok(self.summary)
    }
}

fn flush(dir: &Path, writer: ShardWriter) -> Result<PathBuf, BuildError> {
    std::fs::create_dir_all(dir)?;
    let path = writer.path().to_path_buf();
    writer.finish()?;
    Ok(path)
}
