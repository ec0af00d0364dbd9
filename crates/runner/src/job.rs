//! Reactions for a single text-to-image generation.
//!
//! The server drives the exchange: it asks for the session hash
//! (`send_hash`), then for the inputs (`send_data`), and finally reports
//! the result (`process_completed`). On the duplex transport both
//! answers go back over the socket. The streamed transport is
//! receive-only, so the `send_data` payload is queued on a channel for
//! a background task to POST to the data endpoint instead.

use std::sync::{Arc, Mutex};

use sdq_core::protocol::{SEND_DATA_EVENT, SEND_HASH_EVENT, TERMINAL_EVENT, WILDCARD_EVENT};
use sdq_queue::{QueueMessage, QueueSession, Response, TransportMode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// One generation request and the file it produced, if any.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    fn_index: u32,
    session_hash: String,
    inputs: Vec<Value>,
    trigger_id: Option<u32>,
    produced: Arc<Mutex<Option<String>>>,
}

/// A file reference inside `output.data`.
///
/// Servers report either `{name, is_file}` or `{path, url}` depending on
/// their version.
#[derive(Debug, Deserialize)]
struct FileRef {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    is_file: Option<bool>,
}

impl GenerationJob {
    pub fn new(fn_index: u32, session_hash: impl Into<String>, inputs: Vec<Value>) -> Self {
        Self {
            fn_index,
            session_hash: session_hash.into(),
            inputs,
            trigger_id: None,
            produced: Arc::new(Mutex::new(None)),
        }
    }

    /// Send `trigger_id` with the inputs; newer queue servers use it to
    /// tell which UI event started the call.
    pub fn with_trigger_id(mut self, trigger_id: Option<u32>) -> Self {
        self.trigger_id = trigger_id;
        self
    }

    pub fn fn_index(&self) -> u32 {
        self.fn_index
    }

    pub fn session_hash(&self) -> &str {
        &self.session_hash
    }

    /// Answer to `send_hash`.
    pub fn hash_payload(&self) -> Response {
        let mut payload = Response::new();
        payload.insert("fn_index".into(), json!(self.fn_index));
        payload.insert("session_hash".into(), json!(self.session_hash));
        payload
    }

    /// Answer to `send_data`, echoing the server's `event_id` when given.
    pub fn data_payload(&self, event_id: Option<&str>) -> Response {
        let mut payload = self.hash_payload();
        payload.insert("data".into(), Value::Array(self.inputs.clone()));
        payload.insert("event_data".into(), Value::Null);
        if let Some(event_id) = event_id {
            payload.insert("event_id".into(), json!(event_id));
        }
        if let Some(trigger_id) = self.trigger_id {
            payload.insert("trigger_id".into(), json!(trigger_id));
        }
        payload
    }

    /// File reported by the completion event, once it has arrived.
    pub fn produced(&self) -> Option<String> {
        self.produced.lock().ok().and_then(|slot| slot.clone())
    }

    /// Register this job's reactions on `session`.
    ///
    /// For a streamed session the returned receiver yields the
    /// `send_data` payloads that must be posted out of band; duplex
    /// sessions answer in-band and get `None`.
    pub fn attach(&self, session: &mut QueueSession) -> Option<mpsc::UnboundedReceiver<Response>> {
        session.on(WILDCARD_EVENT, |msg: &QueueMessage, raw: &[u8]| {
            tracing::debug!(
                event = %msg.msg,
                raw = %String::from_utf8_lossy(raw),
                "Queue event",
            );
            None
        });

        let job = self.clone();
        session.on(TERMINAL_EVENT, move |msg: &QueueMessage, _raw: &[u8]| {
            job.record_completion(msg);
            None
        });

        match session.mode() {
            TransportMode::Duplex => {
                let job = self.clone();
                session.on(SEND_HASH_EVENT, move |_msg: &QueueMessage, _raw: &[u8]| {
                    Some(job.hash_payload())
                });
                let job = self.clone();
                session.on(SEND_DATA_EVENT, move |msg: &QueueMessage, _raw: &[u8]| {
                    Some(job.data_payload(msg.event_id.as_deref()))
                });
                None
            }
            TransportMode::Streamed => {
                let (tx, rx) = mpsc::unbounded_channel();
                let job = self.clone();
                session.on(SEND_DATA_EVENT, move |msg: &QueueMessage, _raw: &[u8]| {
                    let payload = job.data_payload(msg.event_id.as_deref());
                    if tx.send(payload).is_err() {
                        tracing::warn!("Data poster is gone, inputs not submitted");
                    }
                    None
                });
                Some(rx)
            }
        }
    }

    // ---- private helpers ----

    fn record_completion(&self, msg: &QueueMessage) {
        if !msg.success {
            return;
        }
        match produced_file(msg) {
            Some(file) => {
                tracing::info!(
                    file = %file,
                    duration = msg.output.duration.unwrap_or_default(),
                    "Generation completed",
                );
                if let Ok(mut slot) = self.produced.lock() {
                    *slot = Some(file);
                }
            }
            None => {
                tracing::warn!(
                    data = ?msg.output.data,
                    "Completion carried no file reference",
                );
            }
        }
    }
}

/// Extract the first produced file from `output.data[0]`.
///
/// Accepts a single file object or a gallery (a list whose first entry
/// is the file). Returns the full `url` when the server provides one,
/// otherwise the server-side path or name.
pub fn produced_file(msg: &QueueMessage) -> Option<String> {
    let first = match msg.output.data_at::<Value>(0).ok()? {
        Value::Array(items) => items.into_iter().next()?,
        other => other,
    };
    // Galleries nest one more level: [[file, caption], ...].
    let first = match first {
        Value::Array(items) => items.into_iter().next()?,
        other => other,
    };

    let file: FileRef = serde_json::from_value(first).ok()?;
    if file.is_file == Some(false) {
        return None;
    }
    file.url.or(file.path).or(file.name)
}
