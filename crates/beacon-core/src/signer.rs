//! NIP-55 signer invocations.
//!
//! A [`SignerInvocation`] is the fully formed message handed to the host's
//! inter-process dispatch: a `nostrsigner:` URI with the payload, the target
//! signer application, a command code and the public key of the logged-in
//! user. Building one is a pure function of its inputs, and no secret key
//! ever appears in it.

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::{Event, KIND_ZAP_REQUEST};
use crate::key::HexKey;

/// URI scheme for signer intents.
pub const NOSTRSIGNER_SCHEME: &str = "nostrsigner";

pub const EXTRA_TYPE: &str = "type";
pub const EXTRA_CURRENT_USER: &str = "current_user";
pub const EXTRA_PUBKEY: &str = "pubkey";
pub const EXTRA_ID: &str = "id";

/// Operations a signer application performs on our behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    GetPublicKey,
    SignEvent,
    Nip04Encrypt,
    Nip04Decrypt,
    Nip44Encrypt,
    Nip44Decrypt,
    DecryptZapEvent,
}

impl CommandType {
    /// Stable wire code carried in the `type` extra.
    pub fn code(&self) -> &'static str {
        match self {
            CommandType::GetPublicKey => "get_public_key",
            CommandType::SignEvent => "sign_event",
            CommandType::Nip04Encrypt => "nip04_encrypt",
            CommandType::Nip04Decrypt => "nip04_decrypt",
            CommandType::Nip44Encrypt => "nip44_encrypt",
            CommandType::Nip44Decrypt => "nip44_decrypt",
            CommandType::DecryptZapEvent => "decrypt_zap_event",
        }
    }

    pub const ALL: [CommandType; 7] = [
        CommandType::GetPublicKey,
        CommandType::SignEvent,
        CommandType::Nip04Encrypt,
        CommandType::Nip04Decrypt,
        CommandType::Nip44Encrypt,
        CommandType::Nip44Decrypt,
        CommandType::DecryptZapEvent,
    ];
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for CommandType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CommandType::ALL
            .iter()
            .copied()
            .find(|c| c.code() == s)
            .ok_or_else(|| Error::UnknownCommand(s.to_string()))
    }
}

/// A delegation message ready for the host dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerInvocation {
    /// `nostrsigner:<payload>`
    pub uri: String,
    /// Application identifier of the signer that must handle this.
    pub package: String,
    pub command: CommandType,
    /// Public key of the identity the signer should use.
    pub current_user: HexKey,
    /// Additional routing metadata, e.g. the peer key for encryption.
    pub extras: BTreeMap<String, String>,
}

impl SignerInvocation {
    fn new(
        command: CommandType,
        payload: &str,
        current_user: &HexKey,
        package: &str,
    ) -> Result<Self> {
        if package.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "signer package name is required".to_string(),
            ));
        }
        Ok(SignerInvocation {
            uri: format!("{}:{}", NOSTRSIGNER_SCHEME, payload),
            package: package.to_string(),
            command,
            current_user: current_user.clone(),
            extras: BTreeMap::new(),
        })
    }

    /// Ask the signer to decrypt a private zap request.
    ///
    /// The URI payload is the canonical JSON of `zap_request`, which must be
    /// a kind 9734 event.
    pub fn decrypt_zap(zap_request: &Event, logged_in_user: &HexKey, package: &str) -> Result<Self> {
        if zap_request.kind != KIND_ZAP_REQUEST {
            return Err(Error::UnexpectedKind {
                expected: KIND_ZAP_REQUEST,
                got: zap_request.kind,
            });
        }
        Self::new(
            CommandType::DecryptZapEvent,
            &zap_request.to_json()?,
            logged_in_user,
            package,
        )
    }

    /// Ask the signer to sign `event`.
    pub fn sign_event(event: &Event, logged_in_user: &HexKey, package: &str) -> Result<Self> {
        Self::new(CommandType::SignEvent, &event.to_json()?, logged_in_user, package)
    }

    pub fn get_public_key(logged_in_user: &HexKey, package: &str) -> Result<Self> {
        Self::new(CommandType::GetPublicKey, "", logged_in_user, package)
    }

    /// Encrypt or decrypt `text` for a conversation with `peer`.
    ///
    /// `command` must be one of the NIP-04 / NIP-44 variants.
    pub fn cipher(
        command: CommandType,
        text: &str,
        peer: &HexKey,
        logged_in_user: &HexKey,
        package: &str,
    ) -> Result<Self> {
        if !matches!(
            command,
            CommandType::Nip04Encrypt
                | CommandType::Nip04Decrypt
                | CommandType::Nip44Encrypt
                | CommandType::Nip44Decrypt
        ) {
            return Err(Error::InvalidArgument(format!(
                "{} is not a cipher command",
                command
            )));
        }
        let mut invocation = Self::new(command, text, logged_in_user, package)?;
        invocation
            .extras
            .insert(EXTRA_PUBKEY.to_string(), peer.to_string());
        Ok(invocation)
    }

    /// Tag the invocation with a caller-chosen correlation id.
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.extras.insert(EXTRA_ID.to_string(), id.into());
        self
    }

    /// Payload after the scheme prefix.
    pub fn payload(&self) -> &str {
        self.uri
            .strip_prefix(NOSTRSIGNER_SCHEME)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or("")
    }

    /// Decode the payload back into an event.
    pub fn payload_event(&self) -> Result<Event> {
        Event::from_json(self.payload())
    }

    /// Flat key/value extras as the host intent expects them, including
    /// the command code and current user.
    pub fn intent_extras(&self) -> BTreeMap<String, String> {
        let mut extras = self.extras.clone();
        extras.insert(EXTRA_TYPE.to_string(), self.command.code().to_string());
        extras.insert(EXTRA_CURRENT_USER.to_string(), self.current_user.to_string());
        extras
    }
}
