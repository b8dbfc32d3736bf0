//! Canonical relay addresses.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// A relay websocket address in canonical form.
///
/// Two inputs naming the same relay (`Relay.Example.com`,
/// `wss://relay.example.com:443/`) normalize to the same value, and equality
/// is defined on that canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NormalizedRelayUrl(String);

impl NormalizedRelayUrl {
    /// Normalize a user- or relay-supplied address.
    ///
    /// Defaults to `wss://` when no scheme is given. Only `ws` and `wss`
    /// are accepted. Default ports and a bare trailing `/` are dropped, as
    /// is any fragment.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidRelayUrl("empty address".to_string()));
        }

        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("wss://{}", trimmed)
        };

        let url = Url::parse(&with_scheme)
            .map_err(|e| Error::InvalidRelayUrl(format!("{}: {}", trimmed, e)))?;

        let scheme = url.scheme();
        if scheme != "ws" && scheme != "wss" {
            return Err(Error::InvalidRelayUrl(format!(
                "unsupported scheme {} in {}",
                scheme, trimmed
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidRelayUrl(format!("missing host in {}", trimmed)))?;

        let mut canonical = format!("{}://{}", scheme, host.to_ascii_lowercase());
        // `Url` already reports `None` for the scheme's default port.
        if let Some(port) = url.port() {
            canonical.push_str(&format!(":{}", port));
        }
        if url.path() != "/" {
            canonical.push_str(url.path());
        }
        if let Some(query) = url.query() {
            canonical.push('?');
            canonical.push_str(query);
        }

        Ok(NormalizedRelayUrl(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the relay is reached over TLS.
    pub fn is_secure(&self) -> bool {
        self.0.starts_with("wss://")
    }
}

impl fmt::Display for NormalizedRelayUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NormalizedRelayUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        NormalizedRelayUrl::parse(s)
    }
}

impl TryFrom<String> for NormalizedRelayUrl {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        NormalizedRelayUrl::parse(&value)
    }
}

impl From<NormalizedRelayUrl> for String {
    fn from(url: NormalizedRelayUrl) -> Self {
        url.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalent_inputs_normalize_equal() {
        let a = NormalizedRelayUrl::parse("wss://relay.example.com").unwrap();
        let b = NormalizedRelayUrl::parse("  WSS://Relay.Example.COM:443/ ").unwrap();
        let c = NormalizedRelayUrl::parse("relay.example.com").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.as_str(), "wss://relay.example.com");
        assert!(a.is_secure());
    }

    #[test]
    fn test_keeps_non_default_port_and_path() {
        let url = NormalizedRelayUrl::parse("ws://localhost:7777/nostr").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:7777/nostr");
        assert!(!url.is_secure());

        let default_ws = NormalizedRelayUrl::parse("ws://localhost:80").unwrap();
        assert_eq!(default_ws.as_str(), "ws://localhost");
    }

    #[test]
    fn test_drops_fragment() {
        let url = NormalizedRelayUrl::parse("wss://relay.example.com/#frag").unwrap();
        assert_eq!(url.as_str(), "wss://relay.example.com");
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(NormalizedRelayUrl::parse("https://relay.example.com").is_err());
        assert!(NormalizedRelayUrl::parse("").is_err());
    }

    #[test]
    fn test_serde_normalizes() {
        let url: NormalizedRelayUrl = serde_json::from_str("\"Relay.Example.com/\"").unwrap();
        assert_eq!(url.as_str(), "wss://relay.example.com");
    }
}
