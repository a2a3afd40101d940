//! Shard discovery and naming
//!
//! A database is a directory tree `<root>/<chain>/<species>/` of shard
//! files named `data-subset-<partition>-<token>.shard`.

use std::path::{Path, PathBuf};

use rand::RngCore;

use crate::config::ConfigError;
use crate::encoding::Partition;
use crate::numbering::ChainClass;

pub const SHARD_EXTENSION: &str = "shard";
const SHARD_PREFIX: &str = "data-subset-";

/// Unique file name for a new shard of `partition`.
pub fn shard_file_name(partition: Partition) -> String {
    format!(
        "{}{}-{}.{}",
        SHARD_PREFIX,
        partition.suffix(),
        make_token(),
        SHARD_EXTENSION
    )
}

fn make_token() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut suffix = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        suffix.push_str(&format!("{:02x}", b));
    }
    format!("{}{}", current_unix_ts(), suffix)
}

fn current_unix_ts() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Partition encoded in a shard file name, if it is one.
pub fn partition_of(path: &Path) -> Option<Partition> {
    if path.extension().and_then(|e| e.to_str()) != Some(SHARD_EXTENSION) {
        return None;
    }
    let name = path.file_name()?.to_str()?;
    let rest = name.strip_prefix(SHARD_PREFIX)?;
    if rest.starts_with("normal-") {
        Some(Partition::Normal)
    } else if rest.starts_with("unusual-") {
        Some(Partition::Unusual)
    } else {
        None
    }
}

/// Directory holding one (chain, species) bucket.
pub fn bucket_dir(root: &Path, chain: ChainClass, species: &str) -> PathBuf {
    root.join(chain.dir_name()).join(species)
}

/// Canonical species directory name for a free-text species.
pub fn normalize_species(species: &str) -> &'static str {
    let lower = species.to_lowercase();
    if lower.contains("his") || lower.contains("kymouse") {
        "Humanised"
    } else if lower.contains("human") {
        "Human"
    } else if lower.contains("mouse") {
        "Mouse"
    } else if lower.contains("rat") {
        "Rat"
    } else if lower.contains("rabbit") {
        "Rabbit"
    } else if lower.contains("camel") {
        "Camel"
    } else if lower.contains("rhesus") {
        "Rhesus"
    } else {
        "Unknown"
    }
}

/// Which shards of a database a search scans.
#[derive(Debug, Clone)]
pub struct ShardFilter<'a> {
    /// `None` = every chain class
    pub chain: Option<ChainClass>,
    /// Empty = every species
    pub species: &'a [String],
    pub partitions: &'a [Partition],
}

impl ShardFilter<'_> {
    fn wants_species(&self, name: &str) -> bool {
        self.species.is_empty() || self.species.iter().any(|s| s.eq_ignore_ascii_case(name))
    }

    fn describe_chain(&self) -> String {
        self.chain
            .map(|c| c.to_string())
            .unwrap_or_else(|| "any".to_string())
    }

    fn describe_species(&self) -> String {
        if self.species.is_empty() {
            "any".to_string()
        } else {
            self.species.join(",")
        }
    }
}

/// Sorted list of matching shard paths under `root`.
///
/// Missing chain or species directories are skipped; an empty result is
/// [`ConfigError::NoShards`].
pub fn discover_shards(root: &Path, filter: &ShardFilter<'_>) -> Result<Vec<PathBuf>, ConfigError> {
    let chains: Vec<ChainClass> = match filter.chain {
        Some(chain) => vec![chain],
        None => vec![ChainClass::Heavy, ChainClass::Light],
    };

    let mut shards = Vec::new();
    for chain in chains {
        let chain_dir = root.join(chain.dir_name());
        if !chain_dir.is_dir() {
            continue;
        }
        for species_entry in std::fs::read_dir(&chain_dir)? {
            let species_entry = species_entry?;
            if !species_entry.file_type()?.is_dir() {
                continue;
            }
            let species_name = species_entry.file_name();
            let Some(species_name) = species_name.to_str() else {
                continue;
            };
            if !filter.wants_species(species_name) {
                continue;
            }
            for entry in std::fs::read_dir(species_entry.path())? {
                let path = entry?.path();
                if matches!(partition_of(&path), Some(p) if filter.partitions.contains(&p)) {
                    shards.push(path);
                }
            }
        }
    }

    if shards.is_empty() {
        return Err(ConfigError::NoShards {
            root: root.to_path_buf(),
            chain: filter.describe_chain(),
            species: filter.describe_species(),
        });
    }

    shards.sort();
    tracing::debug!("discovered {} shards under {:?}", shards.len(), root);
    Ok(shards)
}
