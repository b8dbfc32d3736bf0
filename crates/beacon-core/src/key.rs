//! Hex-encoded 32-byte keys.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Length in characters of a hex-encoded key.
pub const HEX_KEY_LEN: usize = 64;

/// A 32-byte public key in lowercase hex.
///
/// Validated at construction and otherwise opaque. The decoded bytes are
/// kept next to the text form. Only public keys travel through this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexKey {
    hex: String,
    bytes: [u8; 32],
}

impl HexKey {
    /// Parse a hex key, rejecting anything that is not 64 lowercase hex chars.
    pub fn parse(value: &str) -> Result<Self> {
        if value.len() != HEX_KEY_LEN {
            return Err(Error::InvalidHexKey(format!(
                "expected {} characters, got {}",
                HEX_KEY_LEN,
                value.len()
            )));
        }
        if !value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(Error::InvalidHexKey(format!(
                "not lowercase hex: {}",
                value
            )));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(value, &mut bytes)
            .map_err(|e| Error::InvalidHexKey(format!("{}: {}", value, e)))?;
        Ok(HexKey {
            hex: value.to_string(),
            bytes,
        })
    }

    /// Encode raw key bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        HexKey {
            hex: hex::encode(bytes),
            bytes: *bytes,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.hex
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.bytes
    }
}

impl fmt::Display for HexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

impl FromStr for HexKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        HexKey::parse(s)
    }
}

impl TryFrom<String> for HexKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        HexKey::parse(&value)
    }
}

impl From<HexKey> for String {
    fn from(key: HexKey) -> Self {
        key.hex
    }
}

impl AsRef<str> for HexKey {
    fn as_ref(&self) -> &str {
        &self.hex
    }
}
