//! abscan: exhaustive region-weighted identity search over antibody repertoires
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │            abscan CLI  ·  easy_search convenience           │
//! │        search, ingest --db <dir>, stats --shard <file>      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Sharded Top-K Search Engine                 │
//! │     per-shard partial selection, exact running top-N        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │             .shard files  <db>/<chain>/<species>/           │
//! │          zstd sections, prefetched one shard ahead          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use anyhow::Context;
use serde::Serialize;

pub use abscan_core::*;

/// Hits of one region for one query.
#[derive(Debug, Clone, Serialize)]
pub struct RegionHits {
    pub region: String,
    pub length_matched: bool,
    pub hits: Vec<Hit>,
}

/// All regions of one query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    pub query: usize,
    pub regions: Vec<RegionHits>,
}

/// Collect the last completed search of `engine` into a serialisable report.
pub fn search_report(engine: &SearchEngine) -> anyhow::Result<Vec<QueryReport>> {
    let results = engine.results().context("no completed search to report")?;
    let region_set = engine.regions();

    (0..results.n_queries())
        .map(|query| {
            let regions = (0..region_set.len())
                .map(|r| {
                    Ok(RegionHits {
                        region: region_set.mask(r).name().to_string(),
                        length_matched: region_set.length_matched(r),
                        hits: results.get(query, r)?.to_vec(),
                    })
                })
                .collect::<Result<Vec<_>, SearchError>>()?;
            Ok(QueryReport { query, regions })
        })
        .collect()
}

/// Number one sequence, scan the database in `config`, and return every
/// kept hit for the first configured region.
///
/// A sequence the service cannot number is an error, whatever the mode.
pub fn easy_search(
    service: &dyn NumberingService,
    sequence: &str,
    config: SearchConfig,
    keep_best_n: usize,
) -> anyhow::Result<Vec<Hit>> {
    let prepared = prepare_queries(service, &[sequence], EncodingMode::Strict)
        .with_context(|| format!("preparing query {sequence:?}"))?;

    let mut engine = SearchEngine::open(config).context("opening search engine")?;
    let queries: Vec<EncodedSequence> = prepared.iter().map(|q| q.sequence).collect();
    engine
        .search(&queries, keep_best_n)
        .context("scanning shards")?;

    let hits = engine.get_results(0, 0, ResultCount::All)?;
    Ok(hits.to_vec())
}
