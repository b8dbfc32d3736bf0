//! Async runtime for the beacon relay client.
//!
//! This crate provides:
//! - A bounded hashing pool shared by every hashing component
//! - A parallel NIP-13 miner with cancellation, budget and deadline
//! - A subscription hub delivering lifecycle events over channels
//! - NIP-46 and NIP-55 remote signer clients
//! - TOML configuration and tracing setup

pub mod config;
pub mod engine;
pub mod error;
pub mod listener;
pub mod logging;
pub mod miner;
pub mod pool;
pub mod remote_signer;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Result, RuntimeError};
pub use listener::{Subscription, SubscriptionHub};
pub use logging::init_tracing;
pub use miner::{MiningOutcome, MiningReport, MiningStats, ParallelMiner};
pub use pool::HashingPool;
pub use remote_signer::{ExternalSigner, InvocationPort, RemoteSigner, SignerPort};
