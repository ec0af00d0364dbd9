//! Event-name to reaction dispatch table.
//!
//! Each queue event name maps to at most one [`Reaction`]. A reaction
//! registered under [`WILDCARD_EVENT`] (`"*"`) additionally sees every
//! message. Reactions may return a [`Response`] object, which the
//! session writes back when the transport is duplex.

use std::collections::HashMap;
use std::fmt;

use sdq_core::protocol::WILDCARD_EVENT;

use crate::messages::QueueMessage;

/// JSON object a reaction sends back to the server.
pub type Response = serde_json::Map<String, serde_json::Value>;

/// Reacts to one queue message, optionally producing a response.
///
/// Reactions receive the decoded message together with the raw bytes
/// it was decoded from. They do not touch session state; anything a
/// reaction needs to remember goes through state it captures (an
/// `Arc<Mutex<_>>`, a channel sender, ...).
///
/// Implemented for every `Fn(&QueueMessage, &[u8]) -> Option<Response>`
/// closure that is `Send + Sync`.
pub trait Reaction: Send + Sync {
    fn handle(&self, message: &QueueMessage, raw: &[u8]) -> Option<Response>;
}

impl<F> Reaction for F
where
    F: Fn(&QueueMessage, &[u8]) -> Option<Response> + Send + Sync,
{
    fn handle(&self, message: &QueueMessage, raw: &[u8]) -> Option<Response> {
        self(message, raw)
    }
}

/// Table of reactions keyed by event name.
#[derive(Default)]
pub struct EventDispatcher {
    reactions: HashMap<String, Box<dyn Reaction>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `reaction` for `event`, replacing any previous one.
    pub fn register<R>(&mut self, event: impl Into<String>, reaction: R)
    where
        R: Reaction + 'static,
    {
        let event = event.into();
        if self.reactions.insert(event.clone(), Box::new(reaction)).is_some() {
            tracing::debug!(event = %event, "Replaced existing reaction");
        }
    }

    /// Register a closure for `event`, replacing any previous reaction.
    pub fn on<F>(&mut self, event: impl Into<String>, reaction: F)
    where
        F: Fn(&QueueMessage, &[u8]) -> Option<Response> + Send + Sync + 'static,
    {
        self.register(event, reaction);
    }

    /// Whether a reaction is registered for exactly this name.
    pub fn is_registered(&self, event: &str) -> bool {
        self.reactions.contains_key(event)
    }

    pub fn len(&self) -> usize {
        self.reactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reactions.is_empty()
    }

    /// Run the reactions for one message.
    ///
    /// The reaction registered under the message's event name runs
    /// first, then the wildcard reaction. Both receive the same message
    /// and bytes. Non-empty responses are returned in that order; an
    /// empty object counts as no response. The two lookups are
    /// independent, so a message whose event name is literally `"*"`
    /// runs the wildcard reaction twice.
    pub fn dispatch(&self, message: &QueueMessage, raw: &[u8]) -> Vec<Response> {
        let named = self.reactions.get(message.msg.as_str());
        let wildcard = self.reactions.get(WILDCARD_EVENT);

        let responses: Vec<Response> = named
            .into_iter()
            .chain(wildcard)
            .filter_map(|reaction| reaction.handle(message, raw))
            .filter(|response| !response.is_empty())
            .collect();

        tracing::debug!(
            event = %message.msg,
            matched = named.is_some(),
            responses = responses.len(),
            "Dispatched queue message",
        );
        responses
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("events", &self.reactions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;

    fn message(name: &str) -> QueueMessage {
        QueueMessage {
            msg: name.to_string(),
            ..Default::default()
        }
    }

    fn response(value: serde_json::Value) -> Response {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    /// Records every event name it is invoked with.
    struct Recorder {
        label: &'static str,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Reaction for Recorder {
        fn handle(&self, message: &QueueMessage, _raw: &[u8]) -> Option<Response> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.label, message.msg));
            None
        }
    }

    #[test]
    fn only_matching_and_wildcard_reactions_run() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        for label in ["send_hash", "send_data", "process_completed"] {
            dispatcher.register(
                label,
                Recorder {
                    label,
                    calls: Arc::clone(&calls),
                },
            );
        }
        dispatcher.register(
            "*",
            Recorder {
                label: "*",
                calls: Arc::clone(&calls),
            },
        );

        dispatcher.dispatch(&message("send_data"), b"{}");

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["send_data:send_data".to_string(), "*:send_data".to_string()]
        );
    }

    #[test]
    fn unmatched_event_runs_only_wildcard() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(
            "send_hash",
            Recorder {
                label: "send_hash",
                calls: Arc::clone(&calls),
            },
        );
        dispatcher.register(
            "*",
            Recorder {
                label: "*",
                calls: Arc::clone(&calls),
            },
        );

        dispatcher.dispatch(&message("estimation"), b"{}");

        assert_eq!(*calls.lock().unwrap(), vec!["*:estimation".to_string()]);
    }

    #[test]
    fn reactions_see_identical_raw_bytes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        let named_seen = Arc::clone(&seen);
        dispatcher.on("send_hash", move |_msg, raw| {
            named_seen.lock().unwrap().push(raw.to_vec());
            None
        });
        let wildcard_seen = Arc::clone(&seen);
        dispatcher.on("*", move |_msg, raw| {
            wildcard_seen.lock().unwrap().push(raw.to_vec());
            None
        });

        let raw = br#"{"msg":"send_hash"}"#;
        dispatcher.dispatch(&message("send_hash"), raw);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|bytes| bytes == raw));
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.on("send_hash", |_msg, _raw| Some(response(json!({"v": 1}))));
        dispatcher.on("send_hash", |_msg, _raw| Some(response(json!({"v": 2}))));

        assert_eq!(dispatcher.len(), 1);
        let responses = dispatcher.dispatch(&message("send_hash"), b"{}");
        assert_eq!(responses, vec![response(json!({"v": 2}))]);
    }

    #[test]
    fn responses_are_ordered_named_then_wildcard() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.on("*", |_msg, _raw| Some(response(json!({"from": "wildcard"}))));
        dispatcher.on("send_data", |_msg, _raw| Some(response(json!({"from": "named"}))));

        let responses = dispatcher.dispatch(&message("send_data"), b"{}");
        assert_eq!(
            responses,
            vec![
                response(json!({"from": "named"})),
                response(json!({"from": "wildcard"}))
            ]
        );
    }

    #[test]
    fn empty_and_absent_responses_are_dropped() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.on("send_hash", |_msg, _raw| Some(Response::new()));
        dispatcher.on("*", |_msg, _raw| None);

        assert!(dispatcher.dispatch(&message("send_hash"), b"{}").is_empty());
    }

    #[test]
    fn literal_wildcard_event_runs_wildcard_as_named_and_wildcard() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = EventDispatcher::new();
        let counter = Arc::clone(&count);
        dispatcher.on("*", move |_msg, _raw| {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(response(json!({"seen": true})))
        });

        let responses = dispatcher.dispatch(&message("*"), b"{}");
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(responses.len(), 2);
    }

    #[test]
    fn dispatch_without_reactions_is_a_no_op() {
        let dispatcher = EventDispatcher::new();
        assert!(dispatcher.is_empty());
        assert!(dispatcher.dispatch(&message("send_hash"), b"{}").is_empty());
    }
}
