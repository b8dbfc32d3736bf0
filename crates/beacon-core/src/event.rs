//! Signed events and their canonical serialization.
//!
//! An event id is the SHA256 of `[0, pubkey, created_at, kind, tags, content]`
//! serialized as compact JSON. The id is final once the event is signed.

use serde::{Deserialize, Serialize};

use crate::difficulty::{count_leading_zero_bits, NONCE_TAG};
use crate::error::{Error, Result};
use crate::hash::{digest_from_hex, digest_to_hex, sha256, Digest};
use crate::key::HexKey;
use crate::signature::{public_key, sign_schnorr, verify_schnorr};

/// Length in characters of a hex-encoded Schnorr signature.
pub const SIGNATURE_HEX_LEN: usize = 128;

pub const KIND_METADATA: u16 = 0;
pub const KIND_SHORT_TEXT_NOTE: u16 = 1;
/// NIP-57 zap request.
pub const KIND_ZAP_REQUEST: u16 = 9734;
/// NIP-57 zap receipt.
pub const KIND_ZAP_RECEIPT: u16 = 9735;
/// NIP-46 remote signer envelope.
pub const KIND_NOSTR_CONNECT: u16 = 24133;

/// An event that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub pubkey: HexKey,
    /// Unix timestamp in seconds
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl UnsignedEvent {
    pub fn new(
        pubkey: HexKey,
        created_at: u64,
        kind: u16,
        tags: Vec<Vec<String>>,
        content: impl Into<String>,
    ) -> Self {
        UnsignedEvent {
            pubkey,
            created_at,
            kind,
            tags,
            content: content.into(),
        }
    }

    /// Canonical serialization hashed to produce the id.
    pub fn canonical_json(&self) -> Result<String> {
        canonical_json(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    /// Digest of the canonical serialization.
    pub fn digest(&self) -> Result<Digest> {
        Ok(sha256(self.canonical_json()?.as_bytes()))
    }

    /// Fix the id. The result carries no signature.
    pub fn into_event(self) -> Result<Event> {
        let id = digest_to_hex(&self.digest()?);
        Ok(Event {
            id,
            pubkey: self.pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig: None,
        })
    }

    /// Fix the id and sign it with `secret_key`, which must belong to
    /// `pubkey`.
    pub fn sign(self, secret_key: &[u8; 32]) -> Result<Event> {
        if public_key(secret_key)? != self.pubkey {
            return Err(Error::InvalidArgument(format!(
                "secret key does not belong to {}",
                self.pubkey
            )));
        }
        let digest = self.digest()?;
        let sig = sign_schnorr(&digest, secret_key)?;
        let mut event = self.into_event()?;
        event.sig = Some(sig);
        Ok(event)
    }
}

/// A content-addressed event as it appears on the wire.
///
/// Field order matches the wire order: id, pubkey, created_at, kind, tags,
/// content, sig.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Lowercase hex SHA256 of the canonical serialization
    pub id: String,
    pub pubkey: HexKey,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    /// Lowercase hex Schnorr signature, absent until signed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

impl Event {
    /// Parse wire JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Wire JSON with fields in canonical order.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The fields that feed the id, detached from id and signature.
    pub fn unsigned(&self) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: self.pubkey.clone(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }

    /// Recompute the id and compare it with the stored one.
    pub fn verify_id(&self) -> Result<()> {
        let expected = digest_to_hex(&self.unsigned().digest()?);
        if expected != self.id {
            return Err(Error::InvalidEvent(format!(
                "id mismatch: expected {}, got {}",
                expected, self.id
            )));
        }
        Ok(())
    }

    /// Check the signature against the author key and the id.
    pub fn verify_signature(&self) -> Result<()> {
        let sig = self
            .sig
            .as_deref()
            .ok_or_else(|| Error::InvalidSignature("event is unsigned".to_string()))?;
        verify_schnorr(&digest_from_hex(&self.id)?, &self.pubkey, sig)
    }

    /// Full check for events from untrusted sources: id, then signature.
    pub fn verify(&self) -> Result<()> {
        self.verify_id()?;
        self.verify_signature()
    }

    /// Attach a signature produced elsewhere. It must verify.
    pub fn with_signature(mut self, sig: impl Into<String>) -> Result<Self> {
        let sig = sig.into();
        if sig.len() != SIGNATURE_HEX_LEN
            || !sig.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(Error::InvalidSignature(format!("malformed signature: {}", sig)));
        }
        self.sig = Some(sig);
        self.verify()?;
        Ok(self)
    }

    pub fn is_signed(&self) -> bool {
        self.sig.is_some()
    }

    /// Values of the first tag with the given name, excluding the name.
    pub fn tag_values(&self, name: &str) -> Option<&[String]> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .map(|tag| &tag[1..])
    }

    /// All second elements of tags with the given name.
    pub fn tag_refs<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(name))
            .filter_map(|tag| tag.get(1).map(String::as_str))
    }

    /// Leading zero bits of the id.
    pub fn id_leading_zero_bits(&self) -> Result<u32> {
        Ok(count_leading_zero_bits(&digest_from_hex(&self.id)?))
    }

    /// Difficulty committed to by a nonce tag, if any.
    pub fn committed_difficulty(&self) -> Option<u32> {
        self.tag_values(NONCE_TAG)
            .and_then(|values| values.get(1))
            .and_then(|target| target.parse().ok())
    }
}

fn canonical_json(
    pubkey: &HexKey,
    created_at: u64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> Result<String> {
    Ok(serde_json::to_string(&(
        0,
        pubkey.as_str(),
        created_at,
        kind,
        tags,
        content,
    ))?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const PUBKEY: &str =
        "7e7e9c42a91bfef19fa929e5fda1b72e0ebc1a4c1141673e2794234d86addf4e";

    pub(crate) const SECRET: [u8; 32] = [7u8; 32];

    /// `sample_unsigned` authored by the key behind [`SECRET`].
    pub(crate) fn signable_unsigned() -> UnsignedEvent {
        let mut unsigned = sample_unsigned();
        unsigned.pubkey = public_key(&SECRET).unwrap();
        unsigned
    }

    pub(crate) fn sample_unsigned() -> UnsignedEvent {
        UnsignedEvent::new(
            HexKey::parse(PUBKEY).unwrap(),
            1_700_000_000,
            KIND_SHORT_TEXT_NOTE,
            vec![vec!["t".to_string(), "beacon".to_string()]],
            "hello \"relay\"",
        )
    }

    #[test]
    fn test_canonical_json_layout() {
        let json = sample_unsigned().canonical_json().unwrap();
        assert_eq!(
            json,
            format!(
                "[0,\"{}\",1700000000,1,[[\"t\",\"beacon\"]],\"hello \\\"relay\\\"\"]",
                PUBKEY
            )
        );
    }

    #[test]
    fn test_id_is_deterministic() {
        let a = sample_unsigned().into_event().unwrap();
        let b = sample_unsigned().into_event().unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.len(), 64);
        a.verify_id().unwrap();
    }

    #[test]
    fn test_tampered_content_fails_verification() {
        let mut event = sample_unsigned().into_event().unwrap();
        event.content.push('!');
        assert!(event.verify_id().is_err());
    }

    #[test]
    fn test_wire_field_order() {
        let event = signable_unsigned().sign(&SECRET).unwrap();
        let json = event.to_json().unwrap();

        let positions: Vec<usize> = ["\"id\"", "\"pubkey\"", "\"created_at\"", "\"kind\"", "\"tags\"", "\"content\"", "\"sig\""]
            .iter()
            .map(|field| json.find(field).unwrap())
            .collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);

        assert_eq!(Event::from_json(&json).unwrap(), event);
    }

    #[test]
    fn test_unsigned_event_omits_sig() {
        let event = sample_unsigned().into_event().unwrap();
        let json = event.to_json().unwrap();
        assert!(!json.contains("\"sig\""));
        assert!(!event.is_signed());
    }

    #[test]
    fn test_rejects_malformed_signature() {
        let event = sample_unsigned().into_event().unwrap();
        assert!(event.clone().with_signature("abc").is_err());
        assert!(event.with_signature("AB".repeat(64)).is_err());
    }

    #[test]
    fn test_signed_event_verifies() {
        let event = signable_unsigned().sign(&SECRET).unwrap();
        assert!(event.is_signed());
        event.verify().unwrap();

        let sig = event.sig.clone().unwrap();
        let reattached = signable_unsigned()
            .into_event()
            .unwrap()
            .with_signature(sig)
            .unwrap();
        assert_eq!(reattached, event);
    }

    #[test]
    fn test_forged_signature_is_rejected() {
        let event = signable_unsigned().into_event().unwrap();
        assert!(matches!(
            event.with_signature("ab".repeat(64)),
            Err(Error::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_signature_from_other_event_is_rejected() {
        let signed = signable_unsigned().sign(&SECRET).unwrap();
        let mut other = signable_unsigned();
        other.content.push_str(" edited");
        let other = other.into_event().unwrap();
        assert!(other.with_signature(signed.sig.unwrap()).is_err());
    }

    #[test]
    fn test_tampered_signed_event_fails_verify() {
        let mut event = signable_unsigned().sign(&SECRET).unwrap();
        event.content.push('!');
        assert!(event.verify().is_err());

        let mut event = signable_unsigned().sign(&SECRET).unwrap();
        event.sig = None;
        assert!(matches!(event.verify(), Err(Error::InvalidSignature(_))));
    }

    #[test]
    fn test_sign_rejects_foreign_key() {
        assert!(matches!(
            sample_unsigned().sign(&SECRET),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_tag_accessors() {
        let mut unsigned = sample_unsigned();
        unsigned.tags.push(vec!["p".into(), "aa".into()]);
        unsigned.tags.push(vec!["p".into(), "bb".into()]);
        let event = unsigned.into_event().unwrap();

        assert_eq!(event.tag_values("t").unwrap(), &["beacon".to_string()]);
        assert_eq!(event.tag_refs("p").collect::<Vec<_>>(), vec!["aa", "bb"]);
        assert!(event.tag_values("e").is_none());
    }
}
