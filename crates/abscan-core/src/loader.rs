//! Asynchronous shard loading
//!
//! Loads run on a small rayon pool owned by the engine for its lifetime.
//! Each load hands its result back over a bounded(1) channel; the caller
//! holds a [`PendingShard`] and blocks on it only when it needs the data.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};

use crate::config::ConfigError;
use crate::shard::{read_shard, ShardData, ShardError};

/// Log a still-waiting message after this many empty polls.
const POLLS_PER_LOG: u32 = 100;

#[derive(Clone)]
pub struct ShardLoader {
    pool: Arc<rayon::ThreadPool>,
    poll_interval: Duration,
}

impl ShardLoader {
    pub fn new(threads: usize, poll_interval: Duration) -> Result<Self, ConfigError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|idx| format!("abscan-loader-{idx}"))
            .panic_handler(|_| tracing::error!("shard loader worker panicked"))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("building loader pool: {e}")))?;
        Ok(Self {
            pool: Arc::new(pool),
            poll_interval,
        })
    }

    /// Start loading `path`; returns immediately.
    pub fn load(&self, path: &Path) -> PendingShard {
        let (tx, rx) = bounded(1);
        let job_path = path.to_path_buf();
        self.pool.spawn(move || {
            let started = Instant::now();
            let result = read_shard(&job_path);
            match &result {
                Ok(data) => tracing::debug!(
                    "loaded {:?}: {} records in {:?}",
                    job_path,
                    data.len(),
                    started.elapsed()
                ),
                Err(err) => tracing::debug!("failed to load {:?}: {}", job_path, err),
            }
            // The receiver may already be gone if the search was abandoned.
            let _ = tx.send(result);
        });

        PendingShard {
            path: path.to_path_buf(),
            rx,
            poll_interval: self.poll_interval,
        }
    }

    /// Load on the caller's thread.
    pub fn load_blocking(&self, path: &Path) -> Result<ShardData, ShardError> {
        self.load(path).wait()
    }
}

/// Handle to a shard load in flight.
pub struct PendingShard {
    path: PathBuf,
    rx: Receiver<Result<ShardData, ShardError>>,
    poll_interval: Duration,
}

impl PendingShard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_ready(&self) -> bool {
        !self.rx.is_empty()
    }

    /// Block until the load finishes.
    pub fn wait(self) -> Result<ShardData, ShardError> {
        let mut polls = 0u32;
        loop {
            match self.rx.recv_timeout(self.poll_interval) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) => {
                    polls += 1;
                    if polls % POLLS_PER_LOG == 0 {
                        tracing::debug!("still waiting for {:?} after {} polls", self.path, polls);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ShardError::LoaderDisconnected { path: self.path });
                }
            }
        }
    }
}
