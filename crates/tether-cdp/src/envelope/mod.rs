//! Structured v2 frame envelope.
//!
//! The enhanced endpoint family wraps every control frame in
//! `{type, id?, timestamp, data, metadata?}`. CDP traffic is never
//! enveloped; a frame without a `type` field is raw CDP.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::CodecError;

/// Well-known envelope types.
pub mod types {
    /// Device registration request.
    pub const DEVICE_REGISTER: &str = "device:register";
    /// Device registration acknowledgement.
    pub const DEVICE_REGISTER_ACK: &str = "device:register:ack";
    /// Device heartbeat.
    pub const DEVICE_HEARTBEAT: &str = "device:heartbeat";
    /// Device heartbeat acknowledgement.
    pub const DEVICE_HEARTBEAT_ACK: &str = "device:heartbeat:ack";
    /// Device-initiated disconnect.
    pub const DEVICE_DISCONNECT: &str = "device:disconnect";
    /// Operator health snapshot request.
    pub const CONTROL_STATUS: &str = "control:status";
    /// Operator health snapshot reply.
    pub const CONTROL_STATUS_ACK: &str = "control:status:ack";
    /// Operator per-device metrics request.
    pub const CONTROL_METRICS: &str = "control:metrics";
    /// Operator per-device metrics reply.
    pub const CONTROL_METRICS_ACK: &str = "control:metrics:ack";
    /// Operator command dispatch.
    pub const CONTROL_COMMAND: &str = "control:command";
    /// Operator command reply.
    pub const CONTROL_COMMAND_ACK: &str = "control:command:ack";
    /// Structured error reply.
    pub const ERROR: &str = "error";
}

/// A v2 structured frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Frame type discriminator (e.g. "device:register").
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional frame id, echoed in replies when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Server or sender wall-clock time, RFC 3339.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Type-specific payload.
    pub data: Value,
    /// Optional free-form metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Envelope {
    /// Build an outbound envelope with a fresh id and the current time.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            id: Some(Uuid::new_v4().to_string()),
            timestamp: Utc::now(),
            data,
            metadata: None,
        }
    }

    /// Build a reply envelope, echoing the request id when one was given.
    pub fn reply_to(request: &Self, kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            id: request.id.clone(),
            timestamp: Utc::now(),
            data,
            metadata: None,
        }
    }

    /// Build a structured error envelope.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::new(
            types::ERROR,
            serde_json::json!({
                "code": code,
                "message": message.into(),
            }),
        )
    }

    /// Parse an envelope from text.
    ///
    /// # Errors
    ///
    /// Returns an error when the text is not valid JSON, or the `type` or
    /// `data` field is absent.
    pub fn parse(text: &str) -> Result<Self, CodecError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| CodecError::MalformedJson(e.to_string()))?;
        if value.get("type").and_then(Value::as_str).is_none() {
            return Err(CodecError::MissingField("type"));
        }
        if value.get("data").is_none() {
            return Err(CodecError::MissingField("data"));
        }
        serde_json::from_value(value).map_err(|e| CodecError::MalformedJson(e.to_string()))
    }

    /// Serialize this envelope to its wire text.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests;
