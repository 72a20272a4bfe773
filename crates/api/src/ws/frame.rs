//! Outgoing session frames.

use serde::Serialize;
use serde_json::{Map, Value};
use solvergate_core::protocol::{FrameStatus, TaggedId};

/// One message sent to a session's client.
///
/// `elapsedtime`, `user`, and `pid` are filled in by the session when the
/// frame is sent. Operation-specific fields go in `extra` and are flattened
/// into the top-level object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub status: FrameStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsedtime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<TaggedId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Frame {
    pub fn new(status: FrameStatus) -> Self {
        Self {
            status,
            info: None,
            error: None,
            elapsedtime: None,
            user: None,
            pid: None,
            extra: Map::new(),
        }
    }

    /// A `Finished` frame carrying an informational message.
    pub fn finished(info: impl Into<String>) -> Self {
        Self::new(FrameStatus::Finished).info(info)
    }

    /// The keepalive heartbeat: `{"status":"WebSocketOpen"}` and nothing else.
    pub fn heartbeat() -> Self {
        Self::new(FrameStatus::WebSocketOpen)
    }

    pub fn info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach an operation-specific field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    pub fn to_json(&self) -> String {
        // Keys are strings and values are already JSON, so this cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn heartbeat_is_minimal() {
        assert_eq!(Frame::heartbeat().to_json(), r#"{"status":"WebSocketOpen"}"#);
    }

    #[test]
    fn extra_fields_are_flattened() {
        let mut frame = Frame::finished("Run completed").with("data", json!([1, 2]));
        frame.pid = Some(TaggedId::Job(7));
        frame.elapsedtime = Some("3s".into());

        let value: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "Finished",
                "info": "Run completed",
                "elapsedtime": "3s",
                "pid": "m7",
                "data": [1, 2],
            })
        );
    }
}
