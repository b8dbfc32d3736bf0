//! Parallel proof-of-work mining over the hashing pool.
//!
//! Workers claim consecutive nonce ranges from a shared counter and mine
//! each range as one pool job. Cancellation, the attempt budget and the
//! deadline are checked between batches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacon_core::difficulty::expected_attempts;
use beacon_core::pow::{MinedEvent, MiningJob};
use beacon_core::UnsignedEvent;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::MinerConfig;
use crate::error::{Result, RuntimeError};
use crate::pool::HashingPool;

/// How a mining run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiningOutcome {
    Found(MinedEvent),
    /// Attempt budget or deadline reached without a match.
    Exhausted { attempts: u64 },
    /// The caller's cancellation token fired.
    Cancelled { attempts: u64 },
}

/// Mining statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MiningStats {
    /// Total hashes computed.
    pub total_hashes: u64,
    /// Current hash rate (hashes per second).
    pub hash_rate: f64,
    /// Elapsed time in milliseconds.
    pub elapsed_ms: f64,
}

impl MiningStats {
    fn new(total_hashes: u64, elapsed: Duration) -> Self {
        let mut stats = MiningStats {
            total_hashes,
            hash_rate: 0.0,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
        };
        stats.update_hash_rate();
        stats
    }

    /// Update hash rate based on elapsed time.
    pub fn update_hash_rate(&mut self) {
        if self.elapsed_ms > 0.0 {
            self.hash_rate = (self.total_hashes as f64) / (self.elapsed_ms / 1000.0);
        }
    }

    /// Format hash rate for display.
    pub fn format_hash_rate(&self) -> String {
        if self.hash_rate >= 1_000_000_000.0 {
            format!("{:.2} GH/s", self.hash_rate / 1_000_000_000.0)
        } else if self.hash_rate >= 1_000_000.0 {
            format!("{:.2} MH/s", self.hash_rate / 1_000_000.0)
        } else if self.hash_rate >= 1_000.0 {
            format!("{:.2} KH/s", self.hash_rate / 1_000.0)
        } else {
            format!("{:.2} H/s", self.hash_rate)
        }
    }
}

/// Result of [`ParallelMiner::mine`].
#[derive(Debug, Clone)]
pub struct MiningReport {
    pub outcome: MiningOutcome,
    pub stats: MiningStats,
}

/// Shared bookkeeping for one mining run.
struct RunState {
    job: MiningJob,
    next_nonce: AtomicU64,
    reserved: AtomicU64,
    attempts: AtomicU64,
    max_attempts: Option<u64>,
    deadline: Option<Instant>,
    batch_size: u64,
    stop: CancellationToken,
}

impl RunState {
    /// Claim the next nonce range, or `None` when the budget is spent.
    fn claim(&self) -> Option<(u64, u64)> {
        let count = match self.max_attempts {
            Some(max) => {
                let reserved = self.reserved.fetch_add(self.batch_size, Ordering::SeqCst);
                if reserved >= max {
                    return None;
                }
                self.batch_size.min(max - reserved)
            }
            None => self.batch_size,
        };
        let start = self.next_nonce.fetch_add(count, Ordering::SeqCst);
        Some((start, count))
    }

    fn past_deadline(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Proof-of-work miner that spreads attempts over several workers.
#[derive(Debug, Clone)]
pub struct ParallelMiner {
    pool: HashingPool,
    config: MinerConfig,
}

impl ParallelMiner {
    pub fn new(pool: HashingPool, config: MinerConfig) -> Result<Self> {
        if config.workers == 0 || config.batch_size == 0 {
            return Err(RuntimeError::InvalidArgument(
                "miner needs at least one worker and a non-zero batch size".to_string(),
            ));
        }
        Ok(ParallelMiner { pool, config })
    }

    pub fn config(&self) -> &MinerConfig {
        &self.config
    }

    /// Mine `template` until its id has `difficulty` leading zero bits.
    ///
    /// Stops early when `cancel` fires, the attempt budget is spent, or the
    /// configured timeout passes. The mined event is unsigned.
    pub async fn mine(
        &self,
        template: UnsignedEvent,
        difficulty: u32,
        cancel: CancellationToken,
    ) -> Result<MiningReport> {
        let job = MiningJob::new(template, difficulty)?;
        let started = Instant::now();
        let state = Arc::new(RunState {
            job,
            next_nonce: AtomicU64::new(0),
            reserved: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            max_attempts: self.config.max_attempts,
            deadline: self.config.timeout().map(|timeout| started + timeout),
            batch_size: self.config.batch_size,
            stop: cancel.child_token(),
        });

        info!(
            difficulty,
            expected_attempts = expected_attempts(difficulty),
            workers = self.config.workers,
            batch_size = self.config.batch_size,
            "starting proof-of-work"
        );

        let mut workers = JoinSet::new();
        for _ in 0..self.config.workers {
            workers.spawn(worker(self.pool.clone(), state.clone()));
        }

        let mut found = None;
        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            match joined.map_err(RuntimeError::from).and_then(|r| r) {
                Ok(Some(hit)) => {
                    state.stop.cancel();
                    // Every range below a hit was claimed first and runs to
                    // completion, so the lowest hit is the first qualifying nonce.
                    match found {
                        Some((nonce, _)) if nonce <= hit.0 => {}
                        _ => found = Some(hit),
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    state.stop.cancel();
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        let attempts = state.attempts.load(Ordering::SeqCst);
        let stats = MiningStats::new(attempts, started.elapsed());

        let outcome = match found {
            Some((nonce, digest)) => {
                let mined = state.job.finish(nonce, &digest)?;
                info!(
                    nonce,
                    attempts,
                    leading_zero_bits = mined.leading_zero_bits,
                    rate = %stats.format_hash_rate(),
                    "proof-of-work found"
                );
                MiningOutcome::Found(mined)
            }
            None if cancel.is_cancelled() => {
                debug!(attempts, "proof-of-work cancelled");
                MiningOutcome::Cancelled { attempts }
            }
            None => {
                debug!(attempts, "proof-of-work budget exhausted");
                MiningOutcome::Exhausted { attempts }
            }
        };

        Ok(MiningReport { outcome, stats })
    }
}

async fn worker(pool: HashingPool, state: Arc<RunState>) -> Result<Option<(u64, [u8; 32])>> {
    loop {
        if state.stop.is_cancelled() || state.past_deadline() {
            return Ok(None);
        }
        let Some((start, count)) = state.claim() else {
            return Ok(None);
        };

        let batch_state = state.clone();
        let result = pool
            .run(move || batch_state.job.mine_batch(start, count))
            .await?;
        state.attempts.fetch_add(result.attempts, Ordering::SeqCst);

        if let Some(hit) = result.found {
            state.stop.cancel();
            return Ok(Some(hit));
        }
    }
}
