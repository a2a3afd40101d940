//! Sharded top-K search engine
//!
//! # Scan pipeline
//!
//! ```text
//!   shard 0 ──load (blocking)──► score ─► select ─► merge
//!   shard 1 ──load (prefetch)───────────┘           │
//!                                 score ─► select ─► merge
//!   shard 2 ──load (prefetch)───────────┘           │
//!   ...                                              ▼
//!                                               TopKResults
//! ```
//!
//! Shards are scanned strictly in order with one load in flight. Scoring
//! and per-shard selection run on the engine's kernel pool; the merge is a
//! by-value step on a [`TopKAccumulator`] owned by the running search.
//!
//! Ranking is a total order: score descending, then [`SourceId`] ascending.
//! Per-shard selection and the merge both use it, so the final top-N does
//! not depend on how the targets are split into shards.

use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{discover_shards, ShardFilter};
use crate::config::{ConfigError, SearchConfig};
use crate::encoding::EncodedSequence;
use crate::kernel::{self, ScoreTensor};
use crate::loader::ShardLoader;
use crate::regions::RegionSet;
use crate::shard::{ShardData, ShardError, SourceId};

#[derive(Error, Debug)]
pub enum SearchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to load shard {path:?}: {source}")]
    Shard {
        path: PathBuf,
        #[source]
        source: ShardError,
    },

    #[error("No results available: no search has completed")]
    NoResults,

    #[error("Query index {index} out of range ({len} queries)")]
    QueryOutOfRange { index: usize, len: usize },

    #[error("Region index {index} out of range ({len} regions)")]
    RegionOutOfRange { index: usize, len: usize },
}

/// One ranked result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub source: SourceId,
    pub score: f32,
}

/// Score descending, then source ascending.
#[inline]
pub fn rank(a: &Hit, b: &Hit) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.source.cmp(&b.source))
}

/// How many hits [`SearchEngine::get_results`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCount {
    All,
    Top(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Idle = 0,
    LoadingFirstShard = 1,
    Scanning = 2,
    Merging = 3,
    Done = 4,
}

impl EngineState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => EngineState::LoadingFirstShard,
            2 => EngineState::Scanning,
            3 => EngineState::Merging,
            4 => EngineState::Done,
            _ => EngineState::Idle,
        }
    }
}

/// Read-only view of an engine's state, usable from other threads while a
/// search runs.
#[derive(Debug, Clone)]
pub struct EngineStateHandle(Arc<AtomicU8>);

impl EngineStateHandle {
    pub fn get(&self) -> EngineState {
        EngineState::from_u8(self.0.load(AtomicOrdering::Acquire))
    }

    fn set(&self, state: EngineState) {
        self.0.store(state as u8, AtomicOrdering::Release);
    }
}

/// Per-shard top candidates, `[query][region]` flattened.
#[derive(Debug, Clone)]
pub struct ShardCandidates {
    lists: Vec<Vec<Hit>>,
}

/// Select each (query, region) pair's best `keep` targets of one shard.
///
/// Partial selection, bounded by the shard's own record count: a shard with
/// no more than `keep` records contributes all of them. The returned lists
/// are not sorted.
pub fn shard_top_k(tensor: &ScoreTensor, ids: &[SourceId], keep: usize) -> ShardCandidates {
    let n_regions = tensor.n_regions();
    let pairs = tensor.n_queries() * n_regions;

    let lists = (0..pairs)
        .into_par_iter()
        .map(|pair| {
            if keep == 0 {
                return Vec::new();
            }
            let (q, r) = (pair / n_regions, pair % n_regions);
            let mut hits: Vec<Hit> = ids
                .iter()
                .enumerate()
                .map(|(t, source)| Hit {
                    source: *source,
                    score: tensor.get(q, t, r),
                })
                .collect();
            if keep < hits.len() {
                hits.select_nth_unstable_by(keep, rank);
                hits.truncate(keep);
            }
            hits
        })
        .collect();

    ShardCandidates { lists }
}

/// Running top-N per query per region.
///
/// Owned by one search; each shard is folded in through [`merge`](Self::merge).
#[derive(Debug, Clone)]
pub struct TopKAccumulator {
    n_queries: usize,
    n_regions: usize,
    keep: usize,
    lists: Vec<Vec<Hit>>,
}

impl TopKAccumulator {
    pub fn new(n_queries: usize, n_regions: usize, keep: usize) -> Self {
        Self {
            n_queries,
            n_regions,
            keep,
            lists: vec![Vec::new(); n_queries * n_regions],
        }
    }

    pub fn keep(&self) -> usize {
        self.keep
    }

    /// Concatenate with a shard's candidates, sort, truncate.
    pub fn merge(mut self, candidates: ShardCandidates) -> Self {
        debug_assert_eq!(candidates.lists.len(), self.lists.len());
        let keep = self.keep;
        self.lists
            .par_iter_mut()
            .zip(candidates.lists.into_par_iter())
            .for_each(|(carried, fresh)| {
                carried.extend(fresh);
                carried.sort_by(rank);
                carried.truncate(keep);
            });
        self
    }

    pub fn finish(self) -> TopKResults {
        TopKResults {
            n_queries: self.n_queries,
            n_regions: self.n_regions,
            lists: self.lists,
        }
    }
}

/// Frozen results of a completed search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopKResults {
    n_queries: usize,
    n_regions: usize,
    lists: Vec<Vec<Hit>>,
}

impl TopKResults {
    pub fn n_queries(&self) -> usize {
        self.n_queries
    }

    pub fn n_regions(&self) -> usize {
        self.n_regions
    }

    pub fn get(&self, query: usize, region: usize) -> Result<&[Hit], SearchError> {
        if query >= self.n_queries {
            return Err(SearchError::QueryOutOfRange {
                index: query,
                len: self.n_queries,
            });
        }
        if region >= self.n_regions {
            return Err(SearchError::RegionOutOfRange {
                index: region,
                len: self.n_regions,
            });
        }
        Ok(&self.lists[query * self.n_regions + region])
    }
}

pub struct SearchEngine {
    config: SearchConfig,
    regions: RegionSet,
    shards: Vec<PathBuf>,
    loader: ShardLoader,
    kernel_pool: Arc<rayon::ThreadPool>,
    state: EngineStateHandle,
    results: Option<TopKResults>,
}

impl SearchEngine {
    /// Validate `config` and discover the shards it selects.
    pub fn open(config: SearchConfig) -> Result<Self, SearchError> {
        config.validate()?;
        let partitions = config.partitions();
        let shards = discover_shards(
            &config.database_path,
            &ShardFilter {
                chain: config.chain,
                species: &config.species,
                partitions: &partitions,
            },
        )?;
        Self::with_shards(config, shards)
    }

    /// Scan exactly `shards`, in order.
    pub fn with_shards(config: SearchConfig, shards: Vec<PathBuf>) -> Result<Self, SearchError> {
        config.validate()?;
        if shards.is_empty() {
            return Err(ConfigError::NoShards {
                root: config.database_path.clone(),
                chain: config
                    .chain
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "any".to_string()),
                species: if config.species.is_empty() {
                    "any".to_string()
                } else {
                    config.species.join(",")
                },
            }
            .into());
        }

        let regions = RegionSet::new(&config.regions, &config.length_matched)?;
        let loader = ShardLoader::new(config.loader_threads, config.poll_interval())?;
        let kernel_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.kernel_thread_count())
            .thread_name(|idx| format!("abscan-kernel-{idx}"))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("building kernel pool: {e}")))?;

        tracing::debug!(
            "search engine ready: {} shards, regions {:?}",
            shards.len(),
            regions.names()
        );

        Ok(Self {
            config,
            regions,
            shards,
            loader,
            kernel_pool: Arc::new(kernel_pool),
            state: EngineStateHandle(Arc::new(AtomicU8::new(EngineState::Idle as u8))),
            results: None,
        })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn regions(&self) -> &RegionSet {
        &self.regions
    }

    pub fn shards(&self) -> &[PathBuf] {
        &self.shards
    }

    pub fn state(&self) -> EngineState {
        self.state.get()
    }

    pub fn state_handle(&self) -> EngineStateHandle {
        self.state.clone()
    }

    pub fn results(&self) -> Option<&TopKResults> {
        self.results.as_ref()
    }

    /// Exhaustively scan every shard and keep the best `keep_best_n` hits
    /// per query per region.
    ///
    /// Replaces any previous results. On error the engine is left idle
    /// with no results.
    pub fn search(
        &mut self,
        queries: &[EncodedSequence],
        keep_best_n: usize,
    ) -> Result<(), SearchError> {
        self.results = None;

        if queries.is_empty() {
            self.results = Some(TopKAccumulator::new(0, self.regions.len(), 0).finish());
            self.state.set(EngineState::Done);
            return Ok(());
        }

        let started = Instant::now();
        tracing::info!(
            "searching {} queries across {} shards (keep {})",
            queries.len(),
            self.shards.len(),
            keep_best_n
        );

        match self.scan(queries, keep_best_n) {
            Ok(accumulator) => {
                self.results = Some(accumulator.finish());
                self.state.set(EngineState::Done);
                tracing::info!("search finished in {:?}", started.elapsed());
                Ok(())
            }
            Err(err) => {
                self.state.set(EngineState::Idle);
                Err(err)
            }
        }
    }

    fn scan(
        &self,
        queries: &[EncodedSequence],
        keep_best_n: usize,
    ) -> Result<TopKAccumulator, SearchError> {
        self.state.set(EngineState::LoadingFirstShard);
        let first_path = &self.shards[0];
        let mut current = self
            .loader
            .load_blocking(first_path)
            .map_err(|source| SearchError::Shard {
                path: first_path.clone(),
                source,
            })?;

        let mut accumulator =
            TopKAccumulator::new(queries.len(), self.regions.len(), keep_best_n);
        let mut next = 1;
        loop {
            let pending = self.shards.get(next).map(|path| self.loader.load(path));
            next += 1;

            self.state.set(EngineState::Scanning);
            let shard_started = Instant::now();
            let candidates = self.score_shard(queries, &current, keep_best_n);

            self.state.set(EngineState::Merging);
            accumulator = accumulator.merge(candidates);
            tracing::debug!(
                "scored shard {}/{} ({} records) in {:?}",
                next - 1,
                self.shards.len(),
                current.len(),
                shard_started.elapsed()
            );

            let Some(pending) = pending else {
                break;
            };
            let path = pending.path().to_path_buf();
            if !pending.is_ready() {
                tracing::debug!("scan stalled waiting for {:?}", path);
            }
            current = pending
                .wait()
                .map_err(|source| SearchError::Shard { path, source })?;
        }

        Ok(accumulator)
    }

    fn score_shard(
        &self,
        queries: &[EncodedSequence],
        shard: &ShardData,
        keep: usize,
    ) -> ShardCandidates {
        let regions = &self.regions;
        self.kernel_pool.install(|| {
            let tensor = kernel::score_batch(queries, shard.numberings(), regions);
            shard_top_k(&tensor, shard.ids(), keep)
        })
    }

    /// Ranked hits for one query and region of the last completed search.
    pub fn get_results(
        &self,
        query: usize,
        region: usize,
        count: ResultCount,
    ) -> Result<&[Hit], SearchError> {
        let results = self.results.as_ref().ok_or(SearchError::NoResults)?;
        let hits = results.get(query, region)?;
        Ok(match count {
            ResultCount::All => hits,
            ResultCount::Top(n) => &hits[..n.min(hits.len())],
        })
    }
}
