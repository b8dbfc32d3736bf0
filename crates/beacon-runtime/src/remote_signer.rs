//! Delegating signing and encryption to an external signer.
//!
//! [`RemoteSigner`] speaks NIP-46: it numbers each [`BunkerRequest`], hands
//! it to a [`SignerPort`] and waits for the [`BunkerResponse`] carrying the
//! same id, which the transport feeds back through
//! [`RemoteSigner::handle_response`]. Requests are never retried.
//!
//! [`ExternalSigner`] covers NIP-55 apps: it builds [`SignerInvocation`]s and
//! hands them to an [`InvocationPort`] owned by the host.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::{
    BunkerRequest, BunkerResponse, CommandType, Event, HexKey, SignerInvocation, UnsignedEvent,
};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::config::SignerConfig;
use crate::error::{Result, RuntimeError};

/// Outbound half of a NIP-46 transport.
#[async_trait]
pub trait SignerPort: Send + Sync {
    async fn send(&self, request: BunkerRequest) -> Result<()>;
}

#[async_trait]
impl SignerPort for mpsc::Sender<BunkerRequest> {
    async fn send(&self, request: BunkerRequest) -> Result<()> {
        mpsc::Sender::send(self, request)
            .await
            .map_err(|e| RuntimeError::SignerDisconnected(e.0.id))
    }
}

/// Host dispatcher for NIP-55 invocations.
#[async_trait]
pub trait InvocationPort: Send + Sync {
    async fn dispatch(&self, invocation: SignerInvocation) -> Result<()>;
}

#[async_trait]
impl InvocationPort for mpsc::Sender<SignerInvocation> {
    async fn dispatch(&self, invocation: SignerInvocation) -> Result<()> {
        mpsc::Sender::send(self, invocation)
            .await
            .map_err(|e| RuntimeError::SignerDisconnected(e.0.package))
    }
}

type PendingRequests = HashMap<String, oneshot::Sender<BunkerResponse>>;

/// Correlating NIP-46 client.
pub struct RemoteSigner<P> {
    port: P,
    pending: Arc<Mutex<PendingRequests>>,
    request_counter: AtomicU64,
    timeout: Duration,
}

impl<P: SignerPort> RemoteSigner<P> {
    pub fn new(port: P, config: &SignerConfig) -> Self {
        RemoteSigner {
            port,
            pending: Arc::new(Mutex::new(HashMap::new())),
            request_counter: AtomicU64::new(1),
            timeout: config.request_timeout(),
        }
    }

    fn next_id(&self) -> String {
        format!("req-{}", self.request_counter.fetch_add(1, Ordering::SeqCst))
    }

    /// Requests still waiting for an answer.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Send `request` and wait for its answer.
    ///
    /// Returns the `result` string of a successful response. Fails with
    /// [`RuntimeError::SignerRejected`] when the signer answers with an
    /// error and [`RuntimeError::SignerTimeout`] when it does not answer in
    /// time.
    pub async fn call(&self, request: BunkerRequest) -> Result<String> {
        let id = request.id.clone();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.contains_key(&id) {
                return Err(RuntimeError::InvalidArgument(format!(
                    "request id {} is already in flight",
                    id
                )));
            }
            pending.insert(id.clone(), tx);
        }

        debug!(id = %id, method = %request.method, "dispatching signer request");
        if let Err(e) = self.port.send(request).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response
                .into_result()
                .map_err(|message| RuntimeError::SignerRejected { id, message }),
            Ok(Err(_)) => Err(RuntimeError::SignerDisconnected(id)),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                warn!(id = %id, timeout_ms = self.timeout.as_millis() as u64, "signer request timed out");
                Err(RuntimeError::SignerTimeout(id))
            }
        }
    }

    /// Route a response from the transport to its waiting caller. Returns
    /// `false` for ids nobody is waiting on.
    pub async fn handle_response(&self, response: BunkerResponse) -> bool {
        let sender = self.pending.lock().await.remove(&response.id);
        match sender {
            Some(sender) => sender.send(response).is_ok(),
            None => {
                warn!(id = %response.id, "signer response without pending request");
                false
            }
        }
    }

    /// Parse and route a raw response.
    pub async fn handle_text(&self, json: &str) -> Result<bool> {
        let response = BunkerResponse::from_json(json)?;
        Ok(self.handle_response(response).await)
    }

    /// Fail every pending request with [`RuntimeError::SignerDisconnected`].
    pub async fn disconnect(&self) -> usize {
        let mut pending = self.pending.lock().await;
        let count = pending.len();
        pending.clear();
        if count > 0 {
            warn!(pending = count, "signer transport closed with requests in flight");
        }
        count
    }

    pub async fn connect(
        &self,
        remote_signer: &HexKey,
        secret: Option<&str>,
        permissions: Option<&str>,
    ) -> Result<()> {
        let request = BunkerRequest::connect(self.next_id(), remote_signer, secret, permissions);
        self.call(request).await.map(|_| ())
    }

    pub async fn ping(&self) -> Result<()> {
        self.call(BunkerRequest::ping(self.next_id())).await.map(|_| ())
    }

    /// Public key of the identity the signer signs with.
    pub async fn get_public_key(&self) -> Result<HexKey> {
        let result = self.call(BunkerRequest::get_public_key(self.next_id())).await?;
        Ok(HexKey::parse(result.trim())?)
    }

    /// Have the signer sign `event`.
    ///
    /// The returned event must carry the id of `event` and a signature that
    /// verifies against its pubkey.
    pub async fn sign_event(&self, event: &UnsignedEvent) -> Result<Event> {
        let expected_id = hex::encode(event.digest()?);
        let result = self
            .call(BunkerRequest::sign_event(self.next_id(), event)?)
            .await?;
        let signed = Event::from_json(&result)?;
        if signed.id != expected_id || signed.pubkey != event.pubkey {
            return Err(beacon_core::Error::InvalidEvent(
                "signer returned a different event".to_string(),
            )
            .into());
        }
        signed.verify()?;
        Ok(signed)
    }

    pub async fn nip04_encrypt(&self, peer: &HexKey, plaintext: &str) -> Result<String> {
        self.call(BunkerRequest::nip04_encrypt(self.next_id(), peer, plaintext))
            .await
    }

    pub async fn nip04_decrypt(&self, peer: &HexKey, ciphertext: &str) -> Result<String> {
        self.call(BunkerRequest::nip04_decrypt(self.next_id(), peer, ciphertext))
            .await
    }

    pub async fn nip44_encrypt(&self, peer: &HexKey, plaintext: &str) -> Result<String> {
        self.call(BunkerRequest::nip44_encrypt(self.next_id(), peer, plaintext))
            .await
    }

    pub async fn nip44_decrypt(&self, peer: &HexKey, ciphertext: &str) -> Result<String> {
        self.call(BunkerRequest::nip44_decrypt(self.next_id(), peer, ciphertext))
            .await
    }
}

/// Builds and dispatches NIP-55 invocations for one logged-in user.
pub struct ExternalSigner<I> {
    port: I,
    package: String,
    current_user: HexKey,
    request_counter: AtomicU64,
}

impl<I: InvocationPort> ExternalSigner<I> {
    pub fn new(port: I, package: impl Into<String>, current_user: HexKey) -> Self {
        ExternalSigner {
            port,
            package: package.into(),
            current_user,
            request_counter: AtomicU64::new(1),
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    async fn dispatch(&self, invocation: SignerInvocation) -> Result<String> {
        let id = format!("intent-{}", self.request_counter.fetch_add(1, Ordering::SeqCst));
        let invocation = invocation.with_request_id(id.clone());
        debug!(id = %id, command = %invocation.command, package = %self.package, "dispatching signer invocation");
        self.port.dispatch(invocation).await?;
        Ok(id)
    }

    /// Ask the signer app to decrypt a private zap request. Returns the
    /// correlation id attached to the invocation.
    pub async fn decrypt_zap(&self, zap_request: &Event) -> Result<String> {
        let invocation =
            SignerInvocation::decrypt_zap(zap_request, &self.current_user, &self.package)?;
        self.dispatch(invocation).await
    }

    pub async fn sign_event(&self, event: &Event) -> Result<String> {
        let invocation = SignerInvocation::sign_event(event, &self.current_user, &self.package)?;
        self.dispatch(invocation).await
    }

    pub async fn get_public_key(&self) -> Result<String> {
        let invocation = SignerInvocation::get_public_key(&self.current_user, &self.package)?;
        self.dispatch(invocation).await
    }

    /// Run one of the NIP-04 / NIP-44 cipher commands against `peer`.
    pub async fn cipher(&self, command: CommandType, text: &str, peer: &HexKey) -> Result<String> {
        let invocation =
            SignerInvocation::cipher(command, text, peer, &self.current_user, &self.package)?;
        self.dispatch(invocation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::event::KIND_ZAP_REQUEST;
    use beacon_core::signature::public_key;

    const USER: &str = "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d";
    const PEER: &str = "7e7e9c42a91bfef19fa929e5fda1b72e0ebc1a4c1141673e2794234d86addf4e";
    const SECRET: [u8; 32] = [3u8; 32];

    fn signer() -> (
        Arc<RemoteSigner<mpsc::Sender<BunkerRequest>>>,
        mpsc::Receiver<BunkerRequest>,
    ) {
        let (tx, rx) = mpsc::channel(8);
        let config = SignerConfig {
            request_timeout_ms: 1_000,
        };
        (Arc::new(RemoteSigner::new(tx, &config)), rx)
    }

    /// Answer every request with `answer(request)`.
    fn serve<F>(signer: Arc<RemoteSigner<mpsc::Sender<BunkerRequest>>>, mut rx: mpsc::Receiver<BunkerRequest>, answer: F)
    where
        F: Fn(&BunkerRequest) -> BunkerResponse + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                signer.handle_response(answer(&request)).await;
            }
        });
    }

    #[tokio::test]
    async fn test_responses_are_correlated_by_id() {
        let (signer, rx) = signer();
        serve(signer.clone(), rx, |request| {
            BunkerResponse::ok(request.id.clone(), format!("echo:{}", request.params[1]))
        });

        let peer = HexKey::parse(PEER).unwrap();
        let (a, b) = tokio::join!(
            signer.nip44_encrypt(&peer, "first"),
            signer.nip04_encrypt(&peer, "second"),
        );
        assert_eq!(a.unwrap(), "echo:first");
        assert_eq!(b.unwrap(), "echo:second");
        assert_eq!(signer.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_error_response_is_rejection() {
        let (signer, rx) = signer();
        serve(signer.clone(), rx, |request| {
            BunkerResponse::err(request.id.clone(), "permission denied")
        });
        match signer.ping().await.unwrap_err() {
            RuntimeError::SignerRejected { message, .. } => assert_eq!(message, "permission denied"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_signer_times_out() {
        let (signer, _rx) = signer();
        let err = signer.ping().await.unwrap_err();
        assert!(matches!(err, RuntimeError::SignerTimeout(_)));
        assert_eq!(signer.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_closed_port_fails_immediately() {
        let (signer, rx) = signer();
        drop(rx);
        assert!(matches!(
            signer.ping().await,
            Err(RuntimeError::SignerDisconnected(_))
        ));
        assert_eq!(signer.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_fails_waiters() {
        let (signer, mut rx) = signer();
        let waiter = {
            let signer = signer.clone();
            tokio::spawn(async move { signer.ping().await })
        };
        rx.recv().await.unwrap();
        assert_eq!(signer.disconnect().await, 1);
        assert!(matches!(
            waiter.await.unwrap(),
            Err(RuntimeError::SignerDisconnected(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_response_id_is_ignored() {
        let (signer, _rx) = signer();
        assert!(!signer
            .handle_text(r#"{"id":"nobody","result":"x"}"#)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_get_public_key_parses_hex() {
        let (signer, rx) = signer();
        serve(signer.clone(), rx, |request| BunkerResponse::ok(request.id.clone(), USER));
        assert_eq!(signer.get_public_key().await.unwrap().as_str(), USER);
    }

    /// Rebuild the requested template without its tags, then sign it.
    fn sign_untagged(request: &BunkerRequest, forge: bool) -> BunkerResponse {
        let unsigned: serde_json::Value = serde_json::from_str(&request.params[0]).unwrap();
        let template = UnsignedEvent::new(
            HexKey::parse(unsigned["pubkey"].as_str().unwrap()).unwrap(),
            unsigned["created_at"].as_u64().unwrap(),
            unsigned["kind"].as_u64().unwrap() as u16,
            vec![],
            unsigned["content"].as_str().unwrap(),
        );
        let mut event = template.sign(&SECRET).unwrap();
        if forge {
            event.sig = Some("ab".repeat(64));
        }
        BunkerResponse::ok(request.id.clone(), event.to_json().unwrap())
    }

    #[tokio::test]
    async fn test_sign_event_checks_returned_id() {
        let (signer, rx) = signer();
        serve(signer.clone(), rx, |request| sign_untagged(request, false));

        let author = public_key(&SECRET).unwrap();
        let template = UnsignedEvent::new(author.clone(), 1_700_000_000, 1, vec![], "hi");
        let signed = signer.sign_event(&template).await.unwrap();
        assert!(signed.is_signed());
        assert_eq!(signed.id, hex::encode(template.digest().unwrap()));
        signed.verify().unwrap();

        let other = UnsignedEvent::new(author, 1_700_000_000, 1, vec![vec!["t".into(), "x".into()]], "hi");
        assert!(signer.sign_event(&other).await.is_err());
    }

    #[tokio::test]
    async fn test_sign_event_rejects_forged_signature() {
        let (signer, rx) = signer();
        serve(signer.clone(), rx, |request| sign_untagged(request, true));

        let template = UnsignedEvent::new(public_key(&SECRET).unwrap(), 1_700_000_000, 1, vec![], "hi");
        match signer.sign_event(&template).await.unwrap_err() {
            RuntimeError::Core(beacon_core::Error::InvalidSignature(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(signer.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_external_signer_tags_invocations() {
        let (tx, mut rx) = mpsc::channel(4);
        let user = HexKey::parse(USER).unwrap();
        let external = ExternalSigner::new(tx, "com.example.signer", user.clone());

        let zap = UnsignedEvent::new(
            HexKey::parse(PEER).unwrap(),
            1_700_000_000,
            KIND_ZAP_REQUEST,
            vec![vec!["p".into(), USER.into()]],
            "",
        )
        .into_event()
        .unwrap();
        let id = external.decrypt_zap(&zap).await.unwrap();

        let invocation = rx.recv().await.unwrap();
        assert_eq!(invocation.command, CommandType::DecryptZapEvent);
        assert_eq!(invocation.package, "com.example.signer");
        assert_eq!(invocation.current_user, user);
        assert_eq!(invocation.payload_event().unwrap(), zap);
        assert_eq!(invocation.intent_extras().get("id"), Some(&id));

        let note = UnsignedEvent::new(HexKey::parse(PEER).unwrap(), 1, 1, vec![], "")
            .into_event()
            .unwrap();
        assert!(external.decrypt_zap(&note).await.is_err());
    }
}
