//! NIP-46 remote signer ("bunker") request and response envelopes.
//!
//! Requests go out as `{"id": .., "method": .., "params": [..]}` in exactly
//! that field order. Responses carry the same `id` plus either a `result` or
//! an `error`.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::event::UnsignedEvent;
use crate::key::HexKey;

pub const METHOD_CONNECT: &str = "connect";
pub const METHOD_PING: &str = "ping";
pub const METHOD_GET_PUBLIC_KEY: &str = "get_public_key";
pub const METHOD_SIGN_EVENT: &str = "sign_event";
pub const METHOD_NIP04_ENCRYPT: &str = "nip04_encrypt";
pub const METHOD_NIP04_DECRYPT: &str = "nip04_decrypt";
pub const METHOD_NIP44_ENCRYPT: &str = "nip44_encrypt";
pub const METHOD_NIP44_DECRYPT: &str = "nip44_decrypt";

/// A correlated call to the remote signer.
///
/// `params` order is significant per method and is kept as given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BunkerRequest {
    pub id: String,
    pub method: String,
    pub params: Vec<String>,
}

impl BunkerRequest {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Vec<String>) -> Self {
        BunkerRequest {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// `connect(<remote-signer-pubkey>, [secret], [permissions])`
    pub fn connect(
        id: impl Into<String>,
        remote_signer: &HexKey,
        secret: Option<&str>,
        permissions: Option<&str>,
    ) -> Self {
        let mut params = vec![remote_signer.to_string()];
        if let Some(secret) = secret {
            params.push(secret.to_string());
        }
        if let Some(permissions) = permissions {
            if params.len() == 1 {
                params.push(String::new());
            }
            params.push(permissions.to_string());
        }
        Self::new(id, METHOD_CONNECT, params)
    }

    pub fn ping(id: impl Into<String>) -> Self {
        Self::new(id, METHOD_PING, Vec::new())
    }

    pub fn get_public_key(id: impl Into<String>) -> Self {
        Self::new(id, METHOD_GET_PUBLIC_KEY, Vec::new())
    }

    /// Ask the signer to sign `event`. The event is sent as its JSON form
    /// without id or signature, which the signer fills in.
    pub fn sign_event(id: impl Into<String>, event: &UnsignedEvent) -> Result<Self> {
        let payload = serde_json::json!({
            "pubkey": event.pubkey,
            "created_at": event.created_at,
            "kind": event.kind,
            "tags": event.tags,
            "content": event.content,
        });
        Ok(Self::new(
            id,
            METHOD_SIGN_EVENT,
            vec![serde_json::to_string(&payload)?],
        ))
    }

    pub fn nip04_encrypt(id: impl Into<String>, peer: &HexKey, plaintext: &str) -> Self {
        Self::new(
            id,
            METHOD_NIP04_ENCRYPT,
            vec![peer.to_string(), plaintext.to_string()],
        )
    }

    pub fn nip04_decrypt(id: impl Into<String>, peer: &HexKey, ciphertext: &str) -> Self {
        Self::new(
            id,
            METHOD_NIP04_DECRYPT,
            vec![peer.to_string(), ciphertext.to_string()],
        )
    }

    pub fn nip44_encrypt(id: impl Into<String>, peer: &HexKey, plaintext: &str) -> Self {
        Self::new(
            id,
            METHOD_NIP44_ENCRYPT,
            vec![peer.to_string(), plaintext.to_string()],
        )
    }

    pub fn nip44_decrypt(id: impl Into<String>, peer: &HexKey, ciphertext: &str) -> Self {
        Self::new(
            id,
            METHOD_NIP44_DECRYPT,
            vec![peer.to_string(), ciphertext.to_string()],
        )
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// The signer's reply, correlated by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BunkerResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BunkerResponse {
    pub fn ok(id: impl Into<String>, result: impl Into<String>) -> Self {
        BunkerResponse {
            id: id.into(),
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: impl Into<String>) -> Self {
        BunkerResponse {
            id: id.into(),
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The result, or the signer's error message.
    ///
    /// An `error` wins over a `result`. A response with neither yields an
    /// empty result.
    pub fn into_result(self) -> core::result::Result<String, String> {
        match (self.result, self.error) {
            (_, Some(error)) if !error.is_empty() => Err(error),
            (Some(result), _) => Ok(result),
            (None, _) => Ok(String::new()),
        }
    }
}
