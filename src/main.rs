//! abscan CLI
//!
//! Exhaustive identity search over a sharded antibody sequence database.
//!
//! # Usage
//!
//! ```bash
//! # Search: one textual numbering per line in queries.txt
//! abscan search --db ./oasdb --numbering queries.txt --chain heavy --keep 10
//!
//! # Build shards from textual numberings
//! abscan ingest --db ./oasdb --input SRR000001.txt --chain heavy --species human
//!
//! # Inspect a shard
//! abscan stats --shard ./oasdb/Heavy/Human/data-subset-normal-....shard
//! ```

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use abscan::shard::{read_shard, read_shard_header};
use abscan::{
    search_report, BuilderConfig, ChainClass, DatabaseBuilder, EncodedSequence, Encoder,
    EncodingMode, NumberingInput, Region, SearchConfig, SearchEngine, SourceId,
};

#[derive(Parser)]
#[command(name = "abscan")]
#[command(about = "Exhaustive region-weighted identity search over antibody sequence shards")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search a database with pre-numbered queries
    Search {
        /// Database root (contains Heavy/ and Light/)
        #[arg(long)]
        db: PathBuf,

        /// File with one textual numbering per line
        #[arg(short, long)]
        numbering: PathBuf,

        /// JSON search config; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Chain class to search (heavy or light); all if omitted
        #[arg(long)]
        chain: Option<ChainClass>,

        /// Species to search; all if omitted
        #[arg(long, value_delimiter = ',')]
        species: Vec<String>,

        /// Regions to score (whole, cdr1, cdr2, cdr3, cdrs, custom:<labels>)
        #[arg(long, value_delimiter = ';')]
        region: Vec<Region>,

        /// Length-match flag per region
        #[arg(long, value_delimiter = ',')]
        length_matched: Vec<bool>,

        /// Also scan the unusual partitions
        #[arg(long)]
        include_unusual: bool,

        /// Hits to keep per query and region
        #[arg(short = 'k', long, default_value = "10")]
        keep: usize,

        /// Substitute the sentinel for queries that fail to encode
        #[arg(long)]
        lenient: bool,

        /// Write the JSON report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write textual numberings into a database
    Ingest {
        /// Database root
        #[arg(long)]
        db: PathBuf,

        /// File with one textual numbering per line
        #[arg(short, long)]
        input: PathBuf,

        #[arg(long)]
        chain: ChainClass,

        #[arg(long, default_value = "Unknown")]
        species: String,

        /// Source name recorded in sources.json (defaults to the input file stem)
        #[arg(long)]
        source: Option<String>,

        /// Records per normal shard
        #[arg(long, default_value = "4000000")]
        max_records: usize,

        /// Fail on the first record that does not encode
        #[arg(long)]
        strict: bool,
    },

    /// Display the header of a .shard file
    Stats {
        #[arg(short, long)]
        shard: PathBuf,

        /// Also decode and checksum the full shard
        #[arg(long)]
        verify: bool,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Search {
            db,
            numbering,
            config,
            chain,
            species,
            region,
            length_matched,
            include_unusual,
            keep,
            lenient,
            output,
        } => {
            let mut search_config = match config {
                Some(path) => SearchConfig::from_json_file(&path)
                    .with_context(|| format!("loading config {:?}", path))?,
                None => SearchConfig::default(),
            };
            search_config.database_path = db;
            if chain.is_some() {
                search_config.chain = chain;
            }
            if !species.is_empty() {
                search_config.species = species;
            }
            if !region.is_empty() {
                search_config.regions = region;
            }
            if !length_matched.is_empty() {
                search_config.length_matched = length_matched;
            }
            search_config.include_unusual |= include_unusual;
            let search_config = search_config.with_env_overrides()?;

            let mode = if lenient {
                EncodingMode::Lenient
            } else {
                EncodingMode::Strict
            };
            let queries = read_queries(&numbering, mode)?;
            tracing::info!("Loaded {} queries from {:?}", queries.len(), numbering);

            let mut engine = SearchEngine::open(search_config)?;
            engine.search(&queries, keep)?;

            let report = serde_json::to_string_pretty(&search_report(&engine)?)?;
            match output {
                Some(path) => std::fs::write(&path, report)
                    .with_context(|| format!("writing report {:?}", path))?,
                None => println!("{report}"),
            }
        }

        Commands::Ingest {
            db,
            input,
            chain,
            species,
            source,
            max_records,
            strict,
        } => {
            let config = BuilderConfig {
                max_records_per_shard: max_records,
                encoding_mode: if strict {
                    EncodingMode::Strict
                } else {
                    EncodingMode::Lenient
                },
                ..BuilderConfig::default()
            };
            let mut builder = DatabaseBuilder::new(&db, config)?;
            let source = source.unwrap_or_else(|| {
                input
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "unknown".to_string())
            });
            let file_id = builder.add_source(&source);

            let reader = BufReader::new(
                std::fs::File::open(&input).with_context(|| format!("opening {:?}", input))?,
            );
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                builder
                    .add_record(
                        chain,
                        &species,
                        NumberingInput::Text(&line),
                        SourceId::new(file_id, line_no as i32),
                    )
                    .with_context(|| format!("{:?} line {}", input, line_no + 1))?;
            }

            let summary = builder.finish()?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Commands::Stats { shard, verify } => {
            let header = read_shard_header(&shard)
                .with_context(|| format!("reading shard header {:?}", shard))?;
            println!("Shard File: {:?}", shard);
            println!("  Version: {}", header.version);
            println!("  Width: {}", header.width);
            println!("  Records: {}", header.count);
            println!("  Numberings (compressed): {} bytes", header.numberings_len);
            println!("  Idxs (compressed): {} bytes", header.idxs_len);
            if verify {
                let data = read_shard(&shard)?;
                let unusual = data.numberings().iter().filter(|s| s.is_sentinel()).count();
                println!("  Verified: {} records, {} sentinel", data.len(), unusual);
            }
        }
    }

    Ok(())
}

fn read_queries(path: &Path, mode: EncodingMode) -> anyhow::Result<Vec<EncodedSequence>> {
    let encoder = Encoder::new(mode);
    let reader =
        BufReader::new(std::fs::File::open(path).with_context(|| format!("opening {:?}", path))?);

    let mut queries = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = encoder
            .encode(NumberingInput::Text(&line))
            .with_context(|| format!("{:?} line {}", path, line_no + 1))?;
        queries.push(record.sequence);
    }
    Ok(queries)
}
