//! Engine configuration.
//!
//! Every section and field has a default, so an empty TOML document is a
//! valid configuration:
//!
//! ```toml
//! [pool]
//! capacity = 5
//! stream_chunk_size = 8192
//!
//! [miner]
//! workers = 4
//! batch_size = 4096
//! max_attempts = 10000000
//! timeout_ms = 30000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};

/// Default number of concurrent hash computations.
pub const DEFAULT_POOL_CAPACITY: usize = 5;
/// Default miner worker count.
pub const DEFAULT_MINER_WORKERS: usize = 4;
/// Default attempts per mining batch.
pub const DEFAULT_BATCH_SIZE: u64 = 4096;
/// Default per-subscription channel depth.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;
/// Default signer response timeout.
pub const DEFAULT_SIGNER_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pool: PoolConfig,
    pub miner: MinerConfig,
    pub listener: ListenerConfig,
    pub signer: SignerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum hash computations running at once
    pub capacity: usize,
    /// Read size when hashing streams
    pub stream_chunk_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            capacity: DEFAULT_POOL_CAPACITY,
            stream_chunk_size: beacon_core::hash::DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    /// Concurrent nonce ranges
    pub workers: usize,
    /// Attempts per pool slot acquisition
    pub batch_size: u64,
    /// Give up after this many attempts
    pub max_attempts: Option<u64>,
    /// Give up after this long
    pub timeout_ms: Option<u64>,
}

impl MinerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl Default for MinerConfig {
    fn default() -> Self {
        MinerConfig {
            workers: DEFAULT_MINER_WORKERS,
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: None,
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Buffered lifecycle events per subscription
    pub channel_capacity: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    pub request_timeout_ms: u64,
}

impl SignerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for SignerConfig {
    fn default() -> Self {
        SignerConfig {
            request_timeout_ms: DEFAULT_SIGNER_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(input).map_err(|e| RuntimeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool.capacity == 0 {
            return Err(RuntimeError::Config("pool.capacity must be at least 1".into()));
        }
        if self.pool.stream_chunk_size == 0 {
            return Err(RuntimeError::Config(
                "pool.stream_chunk_size must be at least 1".into(),
            ));
        }
        if self.miner.workers == 0 {
            return Err(RuntimeError::Config("miner.workers must be at least 1".into()));
        }
        if self.miner.batch_size == 0 {
            return Err(RuntimeError::Config("miner.batch_size must be at least 1".into()));
        }
        if self.listener.channel_capacity == 0 {
            return Err(RuntimeError::Config(
                "listener.channel_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
