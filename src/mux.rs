//! Subscription multiplexer: many observers per broker subscription.
//!
//! The broker only sees one subscription per topic no matter how many
//! observers registered for it. Inbound payloads are parsed once and fanned
//! out to observers in registration order. Observers are identified by an
//! opaque [`SubscriptionToken`]; removing an observer never tears down the
//! underlying broker subscription (a later registration for the same topic
//! must not race a broker round-trip), only an explicit topic unsubscribe or
//! client shutdown does.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::transport::InboundMessage;

/// Opaque handle identifying one registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(Uuid);

impl SubscriptionToken {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Callback invoked with each parsed payload delivered on a topic.
pub type Observer = Box<dyn FnMut(&Value) + Send + Sync>;

struct Registration {
    token: SubscriptionToken,
    observer: Observer,
}

/// Fan-out table mapping topics to their ordered observer lists.
///
/// Owned by the client's background task; all mutation happens on that task,
/// so no interior locking is needed.
#[derive(Default)]
pub struct Multiplexer {
    topics: HashMap<String, Vec<Registration>>,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer for `topic` under a caller-supplied token.
    ///
    /// Returns whether this is the first observer for the topic, meaning a
    /// broker subscription must be issued.
    pub fn add(&mut self, topic: &str, token: SubscriptionToken, observer: Observer) -> bool {
        let first = !self.topics.contains_key(topic);
        self.topics
            .entry(topic.to_owned())
            .or_default()
            .push(Registration { token, observer });
        first
    }

    /// Remove the observer identified by `token`.
    ///
    /// The topic's broker subscription stays open even when this was its
    /// last observer. Returns `false` when the token is unknown (already
    /// removed, or never issued by this multiplexer).
    pub fn remove(&mut self, token: SubscriptionToken) -> bool {
        for regs in self.topics.values_mut() {
            if let Some(pos) = regs.iter().position(|r| r.token == token) {
                regs.remove(pos);
                return true;
            }
        }
        false
    }

    /// Drop every observer for `topic`.
    ///
    /// Returns `true` when the topic had an entry, in which case the caller
    /// must also send the broker unsubscribe frame.
    pub fn unsubscribe(&mut self, topic: &str) -> bool {
        self.topics.remove(topic).is_some()
    }

    /// Whether any broker subscription exists for `topic` (observers may
    /// have since been removed).
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Topics that need broker subscriptions, for replay after reconnect.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.keys().map(String::as_str)
    }

    /// Parse an inbound message once and deliver it to the topic's observers
    /// in registration order.
    ///
    /// A payload that is not valid JSON is logged and dropped without
    /// reaching any observer. Messages for topics with no entry are dropped
    /// silently (late frames after an unsubscribe).
    pub fn dispatch(&mut self, message: &InboundMessage) {
        let Some(regs) = self.topics.get_mut(&message.topic) else {
            debug!(topic = %message.topic, "dropping message for unsubscribed topic");
            return;
        };
        let payload: Value = match serde_json::from_str(&message.payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(topic = %message.topic, "dropping malformed payload: {e}");
                return;
            }
        };
        for reg in regs.iter_mut() {
            (reg.observer)(&payload);
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn msg(topic: &str, payload: &str) -> InboundMessage {
        InboundMessage {
            topic: topic.to_owned(),
            payload: payload.to_owned(),
        }
    }

    fn recording_observer(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> Observer {
        let log = Arc::clone(log);
        let tag = tag.to_owned();
        Box::new(move |value| {
            log.lock().unwrap().push(format!("{tag}:{value}"));
        })
    }

    #[test]
    fn only_first_observer_needs_a_broker_subscription() {
        let mut mux = Multiplexer::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = mux.add(
            "/topic/leaderboard",
            SubscriptionToken::new(),
            recording_observer(&log, "a"),
        );
        assert!(first);
        let first = mux.add(
            "/topic/leaderboard",
            SubscriptionToken::new(),
            recording_observer(&log, "b"),
        );
        assert!(!first);
    }

    #[test]
    fn fan_out_preserves_registration_order() {
        let mut mux = Multiplexer::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            mux.add(
                "/topic/game/state",
                SubscriptionToken::new(),
                recording_observer(&log, tag),
            );
        }

        mux.dispatch(&msg("/topic/game/state", "\"IN_PROGRESS\""));

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "first:\"IN_PROGRESS\"",
                "second:\"IN_PROGRESS\"",
                "third:\"IN_PROGRESS\"",
            ]
        );
    }

    #[test]
    fn removed_observer_no_longer_receives_but_topic_stays_subscribed() {
        let mut mux = Multiplexer::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let token = SubscriptionToken::new();
        mux.add("/topic/players", token, recording_observer(&log, "a"));

        assert!(mux.remove(token));
        assert!(mux.is_subscribed("/topic/players"));

        mux.dispatch(&msg("/topic/players", "{}"));
        assert!(log.lock().unwrap().is_empty());

        // A token is single-use.
        assert!(!mux.remove(token));
    }

    #[test]
    fn malformed_payload_reaches_no_observer() {
        let mut mux = Multiplexer::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        mux.add(
            "/topic/leaderboard",
            SubscriptionToken::new(),
            recording_observer(&log, "a"),
        );

        mux.dispatch(&msg("/topic/leaderboard", "{not json"));
        assert!(log.lock().unwrap().is_empty());

        // Subsequent valid messages still flow.
        mux.dispatch(&msg("/topic/leaderboard", "[]"));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn unsubscribe_drops_all_observers() {
        let mut mux = Multiplexer::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        mux.add(
            "/topic/teams/7",
            SubscriptionToken::new(),
            recording_observer(&log, "a"),
        );
        mux.add(
            "/topic/teams/7",
            SubscriptionToken::new(),
            recording_observer(&log, "b"),
        );

        assert!(mux.unsubscribe("/topic/teams/7"));
        assert!(!mux.is_subscribed("/topic/teams/7"));
        assert!(!mux.unsubscribe("/topic/teams/7"));

        mux.dispatch(&msg("/topic/teams/7", "{}"));
        assert!(log.lock().unwrap().is_empty());
    }
}
