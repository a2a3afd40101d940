//! Search configuration
//!
//! Defaults mirror a typical database layout: heavy and light chains of any
//! species, normal partitions only, and the three standard identity metrics
//! (whole chain, all CDRs length-matched, CDR3 length-matched).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::encoding::Partition;
use crate::numbering::ChainClass;
use crate::regions::Region;

/// Environment override for the kernel pool size
pub const ENV_KERNEL_THREADS: &str = "ABSCAN_KERNEL_THREADS";
/// Environment override for the loader pool size
pub const ENV_LOADER_THREADS: &str = "ABSCAN_LOADER_THREADS";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Region label {0:?} is not part of the canonical numbering")]
    UnknownRegionLabel(String),

    #[error("Unknown region name {0:?}")]
    UnknownRegionName(String),

    #[error("Region list has {regions} entries but length-match list has {flags}")]
    RegionFlagMismatch { regions: usize, flags: usize },

    #[error("At least one region is required")]
    EmptyRegionSet,

    #[error("Custom region needs at least one position label")]
    EmptyCustomRegion,

    #[error("No shards found for chain {chain} and species {species} under {root:?}")]
    NoShards {
        root: PathBuf,
        chain: String,
        species: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub database_path: PathBuf,
    /// `None` searches every chain class
    pub chain: Option<ChainClass>,
    /// Empty searches every species
    pub species: Vec<String>,
    /// Also scan sentinel-only partitions
    pub include_unusual: bool,
    pub regions: Vec<Region>,
    pub length_matched: Vec<bool>,
    /// 0 = one thread per available core
    pub kernel_threads: usize,
    pub loader_threads: usize,
    pub poll_interval_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::new(),
            chain: None,
            species: Vec::new(),
            include_unusual: false,
            regions: vec![Region::Whole, Region::AllCdrs, Region::Cdr3],
            length_matched: vec![false, true, true],
            kernel_threads: 0,
            loader_threads: 2,
            poll_interval_ms: 10,
        }
    }
}

impl SearchConfig {
    pub fn from_data_dir(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            ..Self::default()
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `ABSCAN_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(threads) = env_usize(ENV_KERNEL_THREADS)? {
            self.kernel_threads = threads;
        }
        if let Some(threads) = env_usize(ENV_LOADER_THREADS)? {
            self.loader_threads = threads;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.regions.is_empty() {
            return Err(ConfigError::EmptyRegionSet);
        }
        if self.regions.len() != self.length_matched.len() {
            return Err(ConfigError::RegionFlagMismatch {
                regions: self.regions.len(),
                flags: self.length_matched.len(),
            });
        }
        if self.loader_threads == 0 {
            return Err(ConfigError::Invalid(
                "loader_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn partitions(&self) -> Vec<Partition> {
        if self.include_unusual {
            vec![Partition::Normal, Partition::Unusual]
        } else {
            vec![Partition::Normal]
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn kernel_thread_count(&self) -> usize {
        if self.kernel_threads > 0 {
            return self.kernel_threads;
        }
        std::thread::available_parallelism()
            .map(|v| v.get())
            .unwrap_or(2)
    }
}

fn env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{key} must be an integer, got {raw:?}"))),
        Err(_) => Ok(None),
    }
}
