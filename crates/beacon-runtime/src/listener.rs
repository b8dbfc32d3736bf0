//! Routes relay traffic to per-subscription lifecycle channels.
//!
//! Each open subscription owns a [`SubscriptionMachine`] keyed by
//! (relay, subscription id) and a bounded channel of [`SubscriptionEvent`]s.
//! The transport layer feeds raw relay messages in with
//! [`SubscriptionHub::handle_message`]; subscribers only read their channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use beacon_core::{
    ClientMessage, Filter, NormalizedRelayUrl, RelayMessage, SubscriptionEvent,
    SubscriptionMachine, SubscriptionState,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ListenerConfig;
use crate::error::{Result, RuntimeError};

type SubscriptionKey = (NormalizedRelayUrl, String);

struct Entry {
    machine: SubscriptionMachine,
    sender: mpsc::Sender<SubscriptionEvent>,
}

/// A freshly opened subscription.
#[derive(Debug)]
pub struct Subscription {
    pub relay: NormalizedRelayUrl,
    pub subscription_id: String,
    /// `["REQ", ...]` to transmit to the relay.
    pub request: String,
    /// Lifecycle events, starting with `Started`. The channel closes after
    /// the terminal event or when the subscription is closed locally.
    pub events: mpsc::Receiver<SubscriptionEvent>,
}

/// Registry of open subscriptions across relays.
#[derive(Clone)]
pub struct SubscriptionHub {
    entries: Arc<Mutex<HashMap<SubscriptionKey, Entry>>>,
    pending_closes: Arc<Mutex<Vec<(NormalizedRelayUrl, String)>>>,
    next_id: Arc<AtomicU64>,
    channel_capacity: usize,
}

impl std::fmt::Debug for SubscriptionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHub")
            .field("open", &self.len())
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

impl SubscriptionHub {
    pub fn new(config: &ListenerConfig) -> Result<Self> {
        if config.channel_capacity == 0 {
            return Err(RuntimeError::InvalidArgument(
                "listener channel capacity must be at least 1".to_string(),
            ));
        }
        Ok(SubscriptionHub {
            entries: Arc::new(Mutex::new(HashMap::new())),
            pending_closes: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            channel_capacity: config.channel_capacity,
        })
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<SubscriptionKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// CLOSE frames owed to relays for subscriptions whose receiver was
    /// dropped. Draining hands them to the transport.
    pub fn take_pending_closes(&self) -> Vec<(NormalizedRelayUrl, String)> {
        std::mem::take(
            &mut *self
                .pending_closes
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Number of open subscriptions.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current state of a subscription, if it is still open.
    pub fn state(&self, relay: &NormalizedRelayUrl, subscription_id: &str) -> Option<SubscriptionState> {
        self.entries()
            .get(&(relay.clone(), subscription_id.to_string()))
            .map(|entry| entry.machine.state())
    }

    /// Open a subscription with a generated id.
    pub async fn open(
        &self,
        relay: NormalizedRelayUrl,
        filters: Vec<Filter>,
    ) -> Result<Subscription> {
        let id = format!("beacon-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.open_with_id(relay, id, filters).await
    }

    /// Open a subscription under a caller-chosen id.
    ///
    /// Fails if the id is already open on that relay. The `Started` event is
    /// queued before this returns.
    pub async fn open_with_id(
        &self,
        relay: NormalizedRelayUrl,
        subscription_id: impl Into<String>,
        filters: Vec<Filter>,
    ) -> Result<Subscription> {
        let subscription_id = subscription_id.into();
        if filters.is_empty() {
            return Err(RuntimeError::InvalidArgument(
                "a subscription needs at least one filter".to_string(),
            ));
        }
        let request = ClientMessage::Req {
            subscription_id: subscription_id.clone(),
            filters: filters.clone(),
        }
        .to_json()?;

        let (sender, events) = mpsc::channel(self.channel_capacity);
        let mut machine = SubscriptionMachine::new(relay.clone(), filters);
        let started = machine.on_start();

        {
            let mut entries = self.entries();
            let key = (relay.clone(), subscription_id.clone());
            if entries.contains_key(&key) {
                return Err(RuntimeError::InvalidArgument(format!(
                    "subscription {} already open on {}",
                    subscription_id, relay
                )));
            }
            entries.insert(
                key,
                Entry {
                    machine,
                    sender: sender.clone(),
                },
            );
        }

        info!(relay = %relay, subscription_id = %subscription_id, "subscription started");
        if let Some(event) = started {
            self.deliver(&relay, &subscription_id, sender, event).await;
        }

        Ok(Subscription {
            relay,
            subscription_id,
            request,
            events,
        })
    }

    /// Parse and route one raw message from `relay`.
    pub async fn handle_text(&self, relay: &NormalizedRelayUrl, text: &str) -> Result<bool> {
        let message = RelayMessage::from_json(text)?;
        Ok(self.handle_message(relay, message).await)
    }

    /// Route one parsed message from `relay`. Returns whether a lifecycle
    /// event was delivered.
    ///
    /// Events whose id or signature does not verify are dropped.
    pub async fn handle_message(&self, relay: &NormalizedRelayUrl, message: RelayMessage) -> bool {
        if let RelayMessage::Event {
            subscription_id,
            event,
        } = &message
        {
            if let Err(e) = event.verify() {
                warn!(
                    relay = %relay,
                    subscription_id = %subscription_id,
                    event_id = %event.id,
                    error = %e,
                    "dropping event that fails verification"
                );
                return false;
            }
        }

        let (subscription_id, dispatched) = {
            let mut entries = self.entries();
            let subscription_id = match message.subscription_id() {
                Some(id) => id.to_string(),
                None => {
                    match &message {
                        RelayMessage::Notice { message } => {
                            info!(relay = %relay, notice = %message, "relay notice");
                        }
                        RelayMessage::Ok {
                            event_id,
                            accepted,
                            message,
                        } => {
                            debug!(relay = %relay, event_id = %event_id, accepted, message = %message, "publish acknowledged");
                        }
                        _ => {}
                    }
                    return false;
                }
            };
            let key = (relay.clone(), subscription_id.clone());
            let Some(entry) = entries.get_mut(&key) else {
                debug!(relay = %relay, subscription_id = %subscription_id, "message for unknown subscription");
                return false;
            };

            let event = match message {
                RelayMessage::Event { event, .. } => entry.machine.on_event(event),
                RelayMessage::Eose { .. } => entry.machine.on_eose(),
                RelayMessage::Closed { message, .. } => entry.machine.on_closed(message),
                RelayMessage::Ok { .. } | RelayMessage::Notice { .. } => None,
            };
            let dispatched = match event {
                Some(event) => {
                    let sender = entry.sender.clone();
                    if event.is_terminal() {
                        entries.remove(&key);
                    }
                    Some((sender, event))
                }
                None => None,
            };
            (subscription_id, dispatched)
        };

        match dispatched {
            Some((sender, event)) => {
                self.deliver(relay, &subscription_id, sender, event).await;
                true
            }
            None => {
                debug!(relay = %relay, subscription_id = %subscription_id, "suppressed relay input");
                false
            }
        }
    }

    /// The transport could not reach `relay`. Every subscription on it
    /// receives `ConnectionFailed` and is removed. Returns how many.
    pub async fn connection_failed(&self, relay: &NormalizedRelayUrl, reason: &str) -> usize {
        let failed: Vec<_> = {
            let mut entries = self.entries();
            let keys: Vec<SubscriptionKey> = entries
                .keys()
                .filter(|(entry_relay, _)| entry_relay == relay)
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| {
                    let mut entry = entries.remove(&key)?;
                    let event = entry.machine.on_cannot_connect(reason)?;
                    Some((key.1, entry.sender, event))
                })
                .collect()
        };

        warn!(relay = %relay, reason, subscriptions = failed.len(), "relay connection failed");
        let count = failed.len();
        for (subscription_id, sender, event) in failed {
            self.deliver(relay, &subscription_id, sender, event).await;
        }
        count
    }

    /// Close a subscription locally. Returns the `["CLOSE", id]` message to
    /// transmit, or `None` if it was not open. No event is delivered; the
    /// subscriber's channel simply ends.
    pub fn close(&self, relay: &NormalizedRelayUrl, subscription_id: &str) -> Result<Option<String>> {
        let removed = self
            .entries()
            .remove(&(relay.clone(), subscription_id.to_string()));
        let Some(mut entry) = removed else {
            return Ok(None);
        };
        entry.machine.terminate();
        debug!(relay = %relay, subscription_id, "subscription closed locally");
        let close = ClientMessage::Close {
            subscription_id: subscription_id.to_string(),
        }
        .to_json()?;
        Ok(Some(close))
    }

    async fn deliver(
        &self,
        relay: &NormalizedRelayUrl,
        subscription_id: &str,
        sender: mpsc::Sender<SubscriptionEvent>,
        event: SubscriptionEvent,
    ) {
        if sender.send(event).await.is_ok() {
            return;
        }

        let key = (relay.clone(), subscription_id.to_string());
        let removed = {
            let mut entries = self.entries();
            let same = entries
                .get(&key)
                .is_some_and(|entry| entry.sender.same_channel(&sender));
            if same {
                entries.remove(&key);
            }
            same
        };
        // Terminal deliveries and re-opened ids leave nothing to close.
        if !removed {
            return;
        }
        debug!(relay = %relay, subscription_id, "subscriber dropped, closing subscription");
        match (ClientMessage::Close {
            subscription_id: subscription_id.to_string(),
        })
        .to_json()
        {
            Ok(close) => self
                .pending_closes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((relay.clone(), close)),
            Err(e) => warn!(relay = %relay, subscription_id, error = %e, "cannot encode CLOSE"),
        }
    }
}
