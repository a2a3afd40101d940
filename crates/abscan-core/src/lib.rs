//! abscan core – exact sharded top-K identity search over encoded antibody chains
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Sharded Top-K Search Engine                 │
//! │     prefetching scan · per-shard selection · exact merge    │
//! ├─────────────────────────────────────────────────────────────┤
//! │      Identity Kernel (region masks + SIMD bitset match)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Shard Loader (engine-owned pool) · .shard (zstd + sha256)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │        Canonical Alignment Encoder (200-slot catalog)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod bits;
pub mod builder;
pub mod catalog;
pub mod config;
pub mod encoding;
pub mod kernel;
pub mod loader;
pub mod numbering;
pub mod query;
pub mod regions;
pub mod search;
pub mod shard;
pub mod simd;

pub use builder::{BuildError, BuildSummary, BuilderConfig, DatabaseBuilder};
pub use config::{ConfigError, SearchConfig};
pub use encoding::{
    EncodedRecord, EncodedSequence, Encoder, EncodingError, EncodingMode, NumberingInput,
    Partition,
};
pub use kernel::{reference_scores, score_batch, ScoreTensor};
pub use numbering::{ChainClass, PositionLabel, CANONICAL_WIDTH};
pub use query::{prepare_queries, NumberedSequence, NumberingService, PreparedQuery};
pub use regions::{Region, RegionMask, RegionSet};
pub use search::{EngineState, Hit, ResultCount, SearchEngine, SearchError, TopKResults};
pub use shard::{read_shard, ShardData, ShardError, ShardWriter, SourceId};
