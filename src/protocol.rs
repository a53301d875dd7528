//! Wire shapes exchanged with the realtime endpoint.
//!
//! Inbound frames are JSON objects `{ "type", "taskId"?, "payload"? }`.
//! `ping`/`pong` are reserved for the heartbeat and never reach subscribers.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Progress,
    Log,
    Status,
    Error,
    Ping,
    Pong,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Log => "log",
            Self::Status => "status",
            Self::Error => "error",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Ping | Self::Pong)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(rename = "taskId", default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub payload: JsonValue,
}

pub fn parse_inbound(text: &str) -> Result<InboundMessage, serde_json::Error> {
    serde_json::from_str(text)
}

/// Normalized envelope handed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealtimeData {
    /// Unix millis at which the frame was received.
    pub timestamp: i64,
    pub value: JsonValue,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, JsonValue>>,
}

impl RealtimeData {
    pub fn from_inbound(msg: InboundMessage, task_id: Option<&str>, timestamp: i64) -> Self {
        let metadata = task_id.map(|id| {
            let mut m = Map::new();
            m.insert("taskId".to_string(), JsonValue::String(id.to_string()));
            m
        });
        Self {
            timestamp,
            value: msg.payload,
            kind: msg.kind,
            metadata,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("taskId"))
            .and_then(|v| v.as_str())
    }

    fn decode<T: DeserializeOwned>(&self, kind: MessageKind) -> Option<T> {
        if self.kind != kind {
            return None;
        }
        serde_json::from_value(self.value.clone()).ok()
    }

    pub fn progress(&self) -> Option<ProgressUpdate> {
        self.decode(MessageKind::Progress)
    }

    pub fn log_entry(&self) -> Option<LogEntry> {
        self.decode(MessageKind::Log)
    }

    pub fn status(&self) -> Option<StatusChange> {
        self.decode(MessageKind::Status)
    }

    pub fn task_error(&self) -> Option<TaskError> {
        self.decode(MessageKind::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Percentage in `0.0..=100.0`.
    pub progress: f64,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub message: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

pub fn ping_frame() -> String {
    serde_json::json!({ "type": "ping" }).to_string()
}

pub fn pong_frame() -> String {
    serde_json::json!({ "type": "pong" }).to_string()
}

pub fn subscribe_frame(task_id: &str) -> String {
    serde_json::json!({ "type": "subscribe", "taskId": task_id }).to_string()
}

pub fn unsubscribe_frame(task_id: &str) -> String {
    serde_json::json!({ "type": "unsubscribe", "taskId": task_id }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_progress_frame() {
        let msg = parse_inbound(r#"{"type":"progress","taskId":"t-1","payload":{"progress":42.5,"stage":"build"}}"#)
            .unwrap();
        assert_eq!(msg.kind, MessageKind::Progress);
        assert_eq!(msg.task_id.as_deref(), Some("t-1"));

        let data = RealtimeData::from_inbound(msg, Some("t-1"), 1_000);
        assert_eq!(data.task_id(), Some("t-1"));
        let p = data.progress().unwrap();
        assert_eq!(p.progress, 42.5);
        assert_eq!(p.stage.as_deref(), Some("build"));
        assert!(data.log_entry().is_none());
    }

    #[test]
    fn payload_and_task_are_optional() {
        let msg = parse_inbound(r#"{"type":"pong"}"#).unwrap();
        assert!(msg.kind.is_heartbeat());
        assert!(!MessageKind::Status.is_heartbeat());
        assert_eq!(msg.task_id, None);
        assert_eq!(msg.payload, JsonValue::Null);
    }

    #[test]
    fn rejects_unknown_type_and_garbage() {
        assert!(parse_inbound(r#"{"type":"telemetry","payload":1}"#).is_err());
        assert!(parse_inbound("not json").is_err());
        assert!(parse_inbound(r#"{"taskId":"x"}"#).is_err());
    }

    #[test]
    fn envelope_serializes_with_type_field() {
        let data = RealtimeData {
            timestamp: 7,
            value: json!({"level": "warn", "message": "slow"}),
            kind: MessageKind::Log,
            metadata: None,
        };
        let v = serde_json::to_value(&data).unwrap();
        assert_eq!(v["type"], "log");
        assert!(v.get("metadata").is_none());
        assert_eq!(data.log_entry().unwrap().level, "warn");
    }

    #[test]
    fn control_frames() {
        let sub: JsonValue = serde_json::from_str(&subscribe_frame("abc")).unwrap();
        assert_eq!(sub, json!({"type": "subscribe", "taskId": "abc"}));
        let ping = parse_inbound(&ping_frame()).unwrap();
        assert_eq!(ping.kind, MessageKind::Ping);
    }
}
