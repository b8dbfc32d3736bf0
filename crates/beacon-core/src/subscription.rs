//! Subscription lifecycle for one (relay, filter set) pair.
//!
//! ```text
//! Idle -> Started -> Live -> Closed | Terminated
//!            |         \
//!            |          -> Failed
//!            -> Closed | Failed | Terminated
//! ```
//!
//! `Closed`, `Failed` and `Terminated` are terminal: every later input is
//! suppressed. Machines for different pairs share nothing.

use std::sync::Arc;

use crate::event::Event;
use crate::filter::Filter;
use crate::relay_url::NormalizedRelayUrl;

/// The filter set a subscription was opened with.
pub type FilterSet = Arc<Vec<Filter>>;

/// A lifecycle notification delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// The REQ was transmitted.
    Started {
        relay: NormalizedRelayUrl,
        filters: FilterSet,
    },
    /// One event arrived. `is_live` is false for stored-event backfill and
    /// true for events pushed after EOSE.
    EventReceived {
        event: Event,
        is_live: bool,
        relay: NormalizedRelayUrl,
        filters: FilterSet,
    },
    /// The relay finished sending stored events.
    Eose {
        relay: NormalizedRelayUrl,
        filters: FilterSet,
    },
    /// The relay ended the subscription.
    Closed {
        reason: String,
        relay: NormalizedRelayUrl,
        filters: FilterSet,
    },
    /// The relay could not be reached.
    ConnectionFailed {
        reason: String,
        relay: NormalizedRelayUrl,
        filters: FilterSet,
    },
}

impl SubscriptionEvent {
    pub fn relay(&self) -> &NormalizedRelayUrl {
        match self {
            SubscriptionEvent::Started { relay, .. }
            | SubscriptionEvent::EventReceived { relay, .. }
            | SubscriptionEvent::Eose { relay, .. }
            | SubscriptionEvent::Closed { relay, .. }
            | SubscriptionEvent::ConnectionFailed { relay, .. } => relay,
        }
    }

    /// Whether no further events follow for this pair.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionEvent::Closed { .. } | SubscriptionEvent::ConnectionFailed { .. }
        )
    }
}

/// State of a single subscription on a single relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Not yet requested.
    Idle,
    /// REQ sent, receiving stored events.
    Started,
    /// EOSE received, receiving live events.
    Live,
    /// Closed by the relay.
    Closed,
    /// Relay unreachable.
    Failed,
    /// Closed locally.
    Terminated,
}

impl SubscriptionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionState::Closed | SubscriptionState::Failed | SubscriptionState::Terminated
        )
    }
}

/// State machine turning raw relay input into lifecycle events.
///
/// Every `on_*` method returns the event to deliver, or `None` when the
/// input is suppressed by the current state.
#[derive(Debug, Clone)]
pub struct SubscriptionMachine {
    relay: NormalizedRelayUrl,
    filters: FilterSet,
    state: SubscriptionState,
    stored_events: u64,
    live_events: u64,
}

impl SubscriptionMachine {
    pub fn new(relay: NormalizedRelayUrl, filters: Vec<Filter>) -> Self {
        SubscriptionMachine {
            relay,
            filters: Arc::new(filters),
            state: SubscriptionState::Idle,
            stored_events: 0,
            live_events: 0,
        }
    }

    pub fn relay(&self) -> &NormalizedRelayUrl {
        &self.relay
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Events received before EOSE.
    pub fn stored_events(&self) -> u64 {
        self.stored_events
    }

    /// Events received after EOSE.
    pub fn live_events(&self) -> u64 {
        self.live_events
    }

    pub fn on_start(&mut self) -> Option<SubscriptionEvent> {
        if self.state != SubscriptionState::Idle {
            return None;
        }
        self.state = SubscriptionState::Started;
        Some(SubscriptionEvent::Started {
            relay: self.relay.clone(),
            filters: self.filters.clone(),
        })
    }

    pub fn on_event(&mut self, event: Event) -> Option<SubscriptionEvent> {
        let is_live = match self.state {
            SubscriptionState::Started => {
                self.stored_events += 1;
                false
            }
            SubscriptionState::Live => {
                self.live_events += 1;
                true
            }
            _ => return None,
        };
        Some(SubscriptionEvent::EventReceived {
            event,
            is_live,
            relay: self.relay.clone(),
            filters: self.filters.clone(),
        })
    }

    /// Only the first EOSE is reported.
    pub fn on_eose(&mut self) -> Option<SubscriptionEvent> {
        if self.state != SubscriptionState::Started {
            return None;
        }
        self.state = SubscriptionState::Live;
        Some(SubscriptionEvent::Eose {
            relay: self.relay.clone(),
            filters: self.filters.clone(),
        })
    }

    pub fn on_closed(&mut self, reason: impl Into<String>) -> Option<SubscriptionEvent> {
        if !matches!(self.state, SubscriptionState::Started | SubscriptionState::Live) {
            return None;
        }
        self.state = SubscriptionState::Closed;
        Some(SubscriptionEvent::Closed {
            reason: reason.into(),
            relay: self.relay.clone(),
            filters: self.filters.clone(),
        })
    }

    pub fn on_cannot_connect(&mut self, reason: impl Into<String>) -> Option<SubscriptionEvent> {
        if self.state.is_terminal() {
            return None;
        }
        self.state = SubscriptionState::Failed;
        Some(SubscriptionEvent::ConnectionFailed {
            reason: reason.into(),
            relay: self.relay.clone(),
            filters: self.filters.clone(),
        })
    }

    /// Close from the client side. Nothing is reported.
    pub fn terminate(&mut self) {
        if !self.state.is_terminal() {
            self.state = SubscriptionState::Terminated;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::tests::sample_unsigned;

    fn machine() -> SubscriptionMachine {
        SubscriptionMachine::new(
            NormalizedRelayUrl::parse("wss://relay.example.com").unwrap(),
            vec![Filter::new().kinds(vec![1])],
        )
    }

    fn event(content: &str) -> Event {
        let mut unsigned = sample_unsigned();
        unsigned.content = content.to_string();
        unsigned.into_event().unwrap()
    }

    fn live_flag(e: &SubscriptionEvent) -> bool {
        match e {
            SubscriptionEvent::EventReceived { is_live, .. } => *is_live,
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_full_lifecycle() {
        let mut m = machine();
        assert!(matches!(m.on_start(), Some(SubscriptionEvent::Started { .. })));

        assert!(!live_flag(&m.on_event(event("a")).unwrap()));
        assert!(!live_flag(&m.on_event(event("b")).unwrap()));
        assert!(matches!(m.on_eose(), Some(SubscriptionEvent::Eose { .. })));
        assert!(live_flag(&m.on_event(event("c")).unwrap()));

        let closed = m.on_closed("bye").unwrap();
        assert!(closed.is_terminal());
        assert_eq!(m.state(), SubscriptionState::Closed);
        assert_eq!(m.stored_events(), 2);
        assert_eq!(m.live_events(), 1);

        assert!(m.on_event(event("d")).is_none());
        assert!(m.on_eose().is_none());
        assert!(m.on_closed("again").is_none());
        assert!(m.on_cannot_connect("late").is_none());
    }

    #[test]
    fn test_duplicate_eose_suppressed() {
        let mut m = machine();
        m.on_start();
        assert!(m.on_eose().is_some());
        assert!(m.on_eose().is_none());
        assert_eq!(m.state(), SubscriptionState::Live);
    }

    #[test]
    fn test_cannot_connect_is_terminal() {
        let mut m = machine();
        m.on_start();
        let failed = m.on_cannot_connect("refused").unwrap();
        assert!(matches!(
            failed,
            SubscriptionEvent::ConnectionFailed { ref reason, .. } if reason == "refused"
        ));
        assert!(m.on_event(event("x")).is_none());
        assert!(m.on_start().is_none());
    }

    #[test]
    fn test_closed_before_eose() {
        let mut m = machine();
        m.on_start();
        assert!(m.on_closed("auth-required: login").is_some());
        assert!(m.on_eose().is_none());
    }

    #[test]
    fn test_events_before_start_are_dropped() {
        let mut m = machine();
        assert!(m.on_event(event("early")).is_none());
        assert!(m.on_closed("no").is_none());
    }

    #[test]
    fn test_terminate_silences_machine() {
        let mut m = machine();
        m.on_start();
        m.terminate();
        assert_eq!(m.state(), SubscriptionState::Terminated);
        assert!(m.on_event(event("x")).is_none());
        assert!(m.on_cannot_connect("x").is_none());
    }
}
