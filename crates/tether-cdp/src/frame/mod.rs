//! CDP frame types and classification.
//!
//! The relay treats the protocol as transparent: a single [`CdpFrame`] shape
//! covers requests, responses, and events, and forwarded frames are relayed
//! as their original text rather than re-serialized.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CodecError;

/// Error code used for every relay-synthesized CDP error response.
pub const CDP_SERVER_ERROR: i64 = -32000;

/// A CDP message id.
///
/// The protocol allows either a number or a string; the pending table keys
/// on this value, so it must be hashable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    /// Numeric id, the common case.
    Number(i64),
    /// String id.
    Text(String),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for MessageId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Error details in a CDP response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdpErrorObject {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub message: String,
    /// Additional error data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A CDP frame: request, response, or event.
///
/// Requests carry `id` + `method`, responses echo `id` without `method`,
/// events carry only `method`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdpFrame {
    /// Message id for request/response correlation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Method name (e.g. "Page.navigate").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Method or event parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Session id for target-scoped traffic.
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CdpErrorObject>,
}

impl CdpFrame {
    /// Parse a CDP frame from text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid JSON or carries neither an
    /// `id` nor a `method` (a frame the protocol cannot name).
    pub fn parse(text: &str) -> Result<Self, CodecError> {
        let frame: Self =
            serde_json::from_str(text).map_err(|e| CodecError::MalformedJson(e.to_string()))?;
        if frame.id.is_none() && frame.method.is_none() {
            return Err(CodecError::MissingField("id or method"));
        }
        Ok(frame)
    }

    /// Build a request frame.
    pub fn request(id: impl Into<MessageId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: Some(id.into()),
            method: Some(method.into()),
            params,
            session_id: None,
            result: None,
            error: None,
        }
    }

    /// Build a success response frame.
    pub fn response(id: MessageId, result: Value) -> Self {
        Self {
            id: Some(id),
            method: None,
            params: None,
            session_id: None,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response frame with the relay's server-error code.
    pub fn error_response(id: MessageId, message: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            method: None,
            params: None,
            session_id: None,
            result: None,
            error: Some(CdpErrorObject {
                code: CDP_SERVER_ERROR,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Build an event frame.
    pub fn event(method: impl Into<String>, params: Value) -> Self {
        Self {
            id: None,
            method: Some(method.into()),
            params: Some(params),
            session_id: None,
            result: None,
            error: None,
        }
    }

    /// A request carries both an id and a method.
    pub fn is_request(&self) -> bool {
        self.id.is_some() && self.method.is_some()
    }

    /// A response echoes an id without a method.
    pub fn is_response(&self) -> bool {
        self.id.is_some() && self.method.is_none()
    }

    /// An event carries a method and no id.
    pub fn is_event(&self) -> bool {
        self.id.is_none() && self.method.is_some()
    }

    /// Serialize this frame to its wire text.
    ///
    /// Synthesized frames only; forwarded traffic keeps its original text.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
