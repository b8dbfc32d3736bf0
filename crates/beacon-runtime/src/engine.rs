//! Components wired from one configuration.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::listener::SubscriptionHub;
use crate::miner::ParallelMiner;
use crate::pool::HashingPool;
use crate::remote_signer::{RemoteSigner, SignerPort};

/// A hashing pool shared by the miner, plus the subscription hub.
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    pool: HashingPool,
    miner: ParallelMiner,
    hub: SubscriptionHub,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let pool = HashingPool::from_config(&config.pool)?;
        let miner = ParallelMiner::new(pool.clone(), config.miner.clone())?;
        let hub = SubscriptionHub::new(&config.listener)?;
        Ok(Engine {
            config,
            pool,
            miner,
            hub,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &HashingPool {
        &self.pool
    }

    pub fn miner(&self) -> &ParallelMiner {
        &self.miner
    }

    pub fn hub(&self) -> &SubscriptionHub {
        &self.hub
    }

    /// A NIP-46 client over `port` using the configured timeout.
    pub fn remote_signer<P: SignerPort>(&self, port: P) -> RemoteSigner<P> {
        RemoteSigner::new(port, &self.config.signer)
    }

    /// Stop admitting hash work.
    pub fn shutdown(&self) {
        self.pool.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_miner_shares_engine_pool() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        assert_eq!(engine.pool().capacity(), 5);
        assert_eq!(engine.miner().config().workers, 4);
        assert!(engine.hub().is_empty());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.miner.batch_size = 0;
        assert!(Engine::new(config).is_err());
    }
}
