//! Queue protocol message type and parser.
//!
//! Both transports carry the same JSON object per message:
//!
//! ```json
//! {"msg": "process_completed", "event_id": "...", "success": true,
//!  "output": {"is_generating": false, "duration": 1.2,
//!             "average_duration": 1.4, "data": [...]}}
//! ```
//!
//! Only `msg` drives dispatch. The shape of `output.data` is specific to
//! each event and application, so it is kept as opaque JSON and decoded
//! on demand by the reaction that knows what to expect.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use sdq_core::protocol::TERMINAL_EVENT;

/// One decoded queue protocol message.
///
/// Missing or `null` fields decode to their defaults, so a bare
/// `{"msg": "estimation"}` is a valid message.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QueueMessage {
    /// Event name, e.g. `send_hash`, `estimation`, `process_completed`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub msg: String,
    /// Server-assigned correlation id for this event, if any.
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub success: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub output: QueueOutput,
}

/// The `output` object of a queue message.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QueueOutput {
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_generating: bool,
    /// Seconds the job took.
    #[serde(default)]
    pub duration: Option<f64>,
    /// Rolling average of job durations on the server.
    #[serde(default)]
    pub average_duration: Option<f64>,
    /// Event-specific result values, in server order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: Vec<serde_json::Value>,
    /// Error text reported alongside an unsuccessful completion.
    #[serde(default)]
    pub error: Option<String>,
}

/// `output.data` did not have the shape a reaction expected.
#[derive(Debug, thiserror::Error)]
pub enum OutputShapeError {
    #[error("output.data has no entry at index {0}")]
    Missing(usize),

    #[error("output.data[{index}] has an unexpected shape: {source}")]
    Shape {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl QueueMessage {
    /// Whether this message ends the session: a successful
    /// `process_completed`.
    pub fn is_terminal(&self) -> bool {
        self.success && self.msg == TERMINAL_EVENT
    }
}

impl QueueOutput {
    /// Decode `data[index]` into `T`.
    ///
    /// Returns a typed error instead of panicking when the entry is
    /// missing or shaped differently, so reactions can degrade
    /// gracefully on unexpected server output.
    pub fn data_at<T: DeserializeOwned>(&self, index: usize) -> Result<T, OutputShapeError> {
        let value = self
            .data
            .get(index)
            .ok_or(OutputShapeError::Missing(index))?;
        T::deserialize(value).map_err(|source| OutputShapeError::Shape { index, source })
    }
}

/// Parse one raw frame or `data: ` payload into a [`QueueMessage`].
pub fn parse_message(raw: &[u8]) -> Result<QueueMessage, serde_json::Error> {
    serde_json::from_slice(raw)
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde::Deserialize;

    use super::*;

    #[test]
    fn parse_full_message() {
        let raw = br#"{"msg":"process_completed","event_id":"e-1","success":true,"output":{"is_generating":false,"duration":1.5,"average_duration":2.0,"data":[{"name":"/tmp/a.png","is_file":true}]}}"#;
        let msg = parse_message(raw).unwrap();
        assert_eq!(msg.msg, "process_completed");
        assert_eq!(msg.event_id.as_deref(), Some("e-1"));
        assert!(msg.success);
        assert!(!msg.output.is_generating);
        assert_eq!(msg.output.duration, Some(1.5));
        assert_eq!(msg.output.average_duration, Some(2.0));
        assert_eq!(msg.output.data.len(), 1);
        assert!(msg.is_terminal());
    }

    #[test]
    fn parse_minimal_message() {
        let msg = parse_message(br#"{"msg":"send_hash"}"#).unwrap();
        assert_eq!(msg.msg, "send_hash");
        assert!(msg.event_id.is_none());
        assert!(!msg.success);
        assert!(msg.output.data.is_empty());
        assert!(!msg.is_terminal());
    }

    #[test]
    fn null_fields_decode_to_defaults() {
        let msg =
            parse_message(br#"{"msg":"estimation","success":null,"output":null,"event_id":null}"#)
                .unwrap();
        assert!(!msg.success);
        assert_eq!(msg.output, QueueOutput::default());
    }

    #[test]
    fn unsuccessful_completion_is_not_terminal() {
        let msg = parse_message(
            br#"{"msg":"process_completed","success":false,"output":{"error":"CUDA out of memory"}}"#,
        )
        .unwrap();
        assert!(!msg.is_terminal());
        assert_eq!(msg.output.error.as_deref(), Some("CUDA out of memory"));
    }

    #[test]
    fn parse_invalid_json_returns_error() {
        assert!(parse_message(b"not json at all").is_err());
        assert!(parse_message(br#"{"msg": 12}"#).is_err());
    }

    #[derive(Debug, Deserialize)]
    struct FileData {
        name: String,
        is_file: bool,
    }

    #[test]
    fn data_at_decodes_expected_shape() {
        let msg = parse_message(
            br#"{"msg":"process_completed","output":{"data":[[{"name":"/tmp/x.png","is_file":true}]]}}"#,
        )
        .unwrap();
        let files: Vec<FileData> = msg.output.data_at(0).unwrap();
        assert_eq!(files[0].name, "/tmp/x.png");
        assert!(files[0].is_file);
    }

    #[test]
    fn data_at_reports_missing_index() {
        let output = QueueOutput::default();
        assert_matches!(
            output.data_at::<String>(0),
            Err(OutputShapeError::Missing(0))
        );
    }

    #[test]
    fn data_at_reports_wrong_shape() {
        let msg = parse_message(br#"{"msg":"x","output":{"data":[42]}}"#).unwrap();
        assert_matches!(
            msg.output.data_at::<FileData>(0),
            Err(OutputShapeError::Shape { index: 0, .. })
        );
    }
}
