//! Protocol and proof-of-work core for the beacon relay client.
//!
//! This crate provides pure Rust implementations of:
//! - Hex keys, content-addressed Schnorr-signed events and subscription filters
//! - Canonical relay addresses and NIP-01 relay messages
//! - The per-relay subscription lifecycle state machine
//! - NIP-46 bunker requests and NIP-55 signer invocations
//! - SHA256 hashing, leading-zero-bit difficulty and NIP-13 mining

pub mod bunker;
pub mod difficulty;
pub mod error;
pub mod event;
pub mod filter;
pub mod hash;
pub mod key;
pub mod message;
pub mod pattern;
pub mod pow;
pub mod relay_url;
pub mod signature;
pub mod signer;
pub mod subscription;

pub use bunker::{BunkerRequest, BunkerResponse};
pub use difficulty::{count_leading_zero_bits, meets_difficulty};
pub use error::{Error, Result};
pub use event::{Event, UnsignedEvent};
pub use filter::Filter;
pub use hash::{sha256, Digest, StreamHasher};
pub use key::HexKey;
pub use message::{ClientMessage, RelayMessage};
pub use pattern::find_subsequence;
pub use pow::{MinedEvent, MiningJob, MiningSession, MiningStatus};
pub use relay_url::NormalizedRelayUrl;
pub use signer::{CommandType, SignerInvocation};
pub use subscription::{FilterSet, SubscriptionEvent, SubscriptionMachine, SubscriptionState};
