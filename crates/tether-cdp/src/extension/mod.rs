//! Legacy extension control messages.
//!
//! The `/extension` socket interleaves `type`-discriminated control messages
//! with raw CDP traffic. [`ExtensionFrame::parse`] splits the two without
//! tearing down the socket on malformed input: the caller logs and drops.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CodecError;
use crate::frame::CdpFrame;

/// Descriptor the extension sends at registration time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Extension display name.
    #[serde(default)]
    pub name: String,
    /// Extension version.
    #[serde(default)]
    pub version: String,
    /// Browser user agent.
    #[serde(rename = "userAgent", default)]
    pub user_agent: String,
    /// Extension-side registration time, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// CDP target descriptor reported once the extension attaches its debugger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetInfo {
    /// Target id.
    #[serde(rename = "targetId")]
    pub target_id: String,
    /// Target type (e.g. "page").
    #[serde(rename = "type")]
    pub target_type: String,
    /// Tab title.
    pub title: String,
    /// Tab URL.
    pub url: String,
    /// Whether a debugger is attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached: Option<bool>,
}

/// A legacy control message from or to the extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExtensionMessage {
    /// Initial registration carrying the device identity and descriptor.
    #[serde(rename = "device_register")]
    DeviceRegister {
        /// Device identifier assigned by the extension.
        #[serde(rename = "deviceId")]
        device_id: String,
        /// Device descriptor.
        #[serde(rename = "deviceInfo", default)]
        device_info: DeviceInfo,
    },
    /// Heartbeat ping.
    #[serde(rename = "ping")]
    Ping {
        /// Device identifier.
        #[serde(rename = "deviceId")]
        device_id: String,
    },
    /// Heartbeat reply.
    #[serde(rename = "pong")]
    Pong {
        /// Device identifier, echoed verbatim.
        #[serde(rename = "deviceId")]
        device_id: String,
        /// Server wall-clock time, epoch milliseconds.
        timestamp: i64,
    },
    /// Target descriptor update after the extension attaches to a tab.
    #[serde(rename = "connection_info")]
    ConnectionInfo {
        /// Device identifier, absent on sockets that already registered.
        #[serde(rename = "deviceId", default, skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
        /// CDP session id for the attached target.
        #[serde(rename = "sessionId")]
        session_id: String,
        /// Target descriptor.
        #[serde(rename = "targetInfo")]
        target_info: TargetInfo,
    },
}

const KNOWN_TYPES: &[&str] = &["device_register", "ping", "pong", "connection_info"];

/// An inbound frame on an extension-facing socket.
#[derive(Debug, Clone)]
pub enum ExtensionFrame {
    /// A `type`-discriminated control message.
    Control(ExtensionMessage),
    /// A raw CDP frame (response or event from the browser).
    Cdp(CdpFrame),
}

impl ExtensionFrame {
    /// Classify and parse an inbound frame.
    ///
    /// Frames carrying a string `type` field are control messages; anything
    /// else is treated as CDP.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid JSON, an unknown `type` discriminator,
    /// or a CDP frame with neither `id` nor `method`.
    pub fn parse(text: &str) -> Result<Self, CodecError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| CodecError::MalformedJson(e.to_string()))?;
        match value.get("type").and_then(Value::as_str) {
            Some(kind) => {
                if !KNOWN_TYPES.contains(&kind) {
                    return Err(CodecError::UnknownType(kind.to_string()));
                }
                let message = serde_json::from_value(value)
                    .map_err(|e| CodecError::MalformedJson(e.to_string()))?;
                Ok(Self::Control(message))
            }
            None => {
                let frame: CdpFrame = serde_json::from_value(value)
                    .map_err(|e| CodecError::MalformedJson(e.to_string()))?;
                if frame.id.is_none() && frame.method.is_none() {
                    return Err(CodecError::MissingField("id or method"));
                }
                Ok(Self::Cdp(frame))
            }
        }
    }
}

impl ExtensionMessage {
    /// Build a pong reply for a ping.
    pub fn pong(device_id: impl Into<String>, timestamp: i64) -> Self {
        Self::Pong {
            device_id: device_id.into(),
            timestamp,
        }
    }

    /// Serialize this message to its wire text.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests;
