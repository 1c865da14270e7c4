//! Relay error taxonomy.
//!
//! Every error maps to a kind (network, protocol, state, resource, timeout,
//! business), a stable code string, and a recoverability flag. State and
//! business errors surface to clients as CDP error frames with code -32000
//! and a `"<CODE>: <text>"` message.

use std::time::Duration;

use thiserror::Error;

use tether_cdp::{CdpFrame, MessageId};

use crate::device::DeviceState;

/// Broad error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport failure or unexpected close.
    Network,
    /// Malformed frame, missing envelope field, unknown message type.
    Protocol,
    /// Invalid state transition, device not found / not active.
    State,
    /// Queue full, lock timeout, max instances reached.
    Resource,
    /// Pending-request TTL expiry, retries exhausted.
    Timeout,
    /// Registration conflicts, capability validation, unknown commands.
    Business,
}

/// An error raised by the relay engine.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Writing to or reading from a socket failed.
    #[error("transport failure: {reason}")]
    Transport {
        /// Failure detail.
        reason: String,
        /// Device involved, when known.
        device_id: Option<String>,
    },

    /// A socket closed without a close handshake.
    #[error("connection closed unexpectedly")]
    UnexpectedClose {
        /// Device involved, when known.
        device_id: Option<String>,
    },

    /// The frame could not be decoded.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// A required envelope field was absent.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The message type discriminator is not known to this relay.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// The requested state edge is not in the permitted set.
    #[error("invalid state transition for device {device_id}: {from} -> {to}")]
    InvalidStateTransition {
        /// Device id.
        device_id: String,
        /// Current state.
        from: DeviceState,
        /// Rejected target state.
        to: DeviceState,
    },

    /// Registration requires CONNECTING or AUTHENTICATING.
    #[error("device {device_id} cannot register from state {state}")]
    InvalidRegistrationState {
        /// Device id.
        device_id: String,
        /// Observed state.
        state: DeviceState,
    },

    /// No record under the given device id.
    #[error("no device with id {0}")]
    DeviceNotFound(String),

    /// The device exists but does not accept routing.
    #[error("device {device_id} is {state}, not ACTIVE")]
    DeviceNotActive {
        /// Device id.
        device_id: String,
        /// Observed state.
        state: DeviceState,
    },

    /// The device backlog is at capacity.
    #[error("queue full for device {device_id} ({limit} entries)")]
    QueueFull {
        /// Device id.
        device_id: String,
        /// Configured bound.
        limit: usize,
    },

    /// The per-device advisory lock was not acquired in time.
    #[error("timed out acquiring lock for device {device_id}")]
    LockTimeout {
        /// Device id.
        device_id: String,
    },

    /// The connection cap was reached.
    #[error("maximum concurrent connections reached ({0})")]
    MaxInstances(usize),

    /// No response arrived within the configured deadline.
    #[error("no response within {0:?}")]
    MessageTimeout(Duration),

    /// The retry budget is spent.
    #[error("retries exhausted after {0} attempts")]
    RetriesExhausted(u32),

    /// The device vanished while requests were in flight.
    #[error("device {device_id} became unavailable: {reason}")]
    DeviceUnavailable {
        /// Device id.
        device_id: String,
        /// What happened to it.
        reason: String,
    },

    /// Capability validation failed at v2 registration.
    #[error("capability validation failed: {0}")]
    InvalidCapabilities(String),

    /// An operator command named something the control plane cannot do.
    #[error("unknown control command: {0}")]
    UnknownCommand(String),
}

impl RelayError {
    /// Broad category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } | Self::UnexpectedClose { .. } => ErrorKind::Network,
            Self::Malformed(_) | Self::MissingField(_) | Self::UnknownType(_) => {
                ErrorKind::Protocol
            }
            Self::InvalidStateTransition { .. }
            | Self::InvalidRegistrationState { .. }
            | Self::DeviceNotFound(_)
            | Self::DeviceNotActive { .. } => ErrorKind::State,
            Self::QueueFull { .. } | Self::LockTimeout { .. } | Self::MaxInstances(_) => {
                ErrorKind::Resource
            }
            Self::MessageTimeout(_) | Self::RetriesExhausted(_) => ErrorKind::Timeout,
            Self::DeviceUnavailable { .. }
            | Self::InvalidCapabilities(_)
            | Self::UnknownCommand(_) => ErrorKind::Business,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "TRANSPORT_FAILURE",
            Self::UnexpectedClose { .. } => "UNEXPECTED_CLOSE",
            Self::Malformed(_) => "MALFORMED_FRAME",
            Self::MissingField(_) => "MISSING_FIELD",
            Self::UnknownType(_) => "UNKNOWN_MESSAGE_TYPE",
            Self::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            Self::InvalidRegistrationState { .. } => "INVALID_REGISTRATION_STATE",
            Self::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            Self::DeviceNotActive { .. } => "DEVICE_NOT_ACTIVE",
            Self::QueueFull { .. } => "QUEUE_FULL",
            Self::LockTimeout { .. } => "LOCK_TIMEOUT",
            Self::MaxInstances(_) => "MAX_INSTANCES_REACHED",
            Self::MessageTimeout(_) => "MESSAGE_TIMEOUT",
            Self::RetriesExhausted(_) => "MAX_RETRIES_EXCEEDED",
            Self::DeviceUnavailable { .. } => "DEVICE_UNAVAILABLE",
            Self::InvalidCapabilities(_) => "INVALID_CAPABILITIES",
            Self::UnknownCommand(_) => "UNKNOWN_COMMAND",
        }
    }

    /// Whether the caller may retry or re-register after this error.
    pub fn recoverable(&self) -> bool {
        match self {
            Self::Transport { .. }
            | Self::UnexpectedClose { .. }
            | Self::Malformed(_)
            | Self::MissingField(_)
            | Self::UnknownType(_)
            | Self::DeviceNotActive { .. }
            | Self::QueueFull { .. }
            | Self::LockTimeout { .. }
            | Self::MaxInstances(_)
            | Self::MessageTimeout(_)
            | Self::DeviceUnavailable { .. } => true,
            Self::InvalidStateTransition { .. }
            | Self::InvalidRegistrationState { .. }
            | Self::DeviceNotFound(_)
            | Self::RetriesExhausted(_)
            | Self::InvalidCapabilities(_)
            | Self::UnknownCommand(_) => false,
        }
    }

    /// Device the error concerns, when one is known.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::Transport { device_id, .. } | Self::UnexpectedClose { device_id } => {
                device_id.as_deref()
            }
            Self::InvalidStateTransition { device_id, .. }
            | Self::InvalidRegistrationState { device_id, .. }
            | Self::DeviceNotActive { device_id, .. }
            | Self::QueueFull { device_id, .. }
            | Self::LockTimeout { device_id }
            | Self::DeviceUnavailable { device_id, .. } => Some(device_id),
            Self::DeviceNotFound(id) => Some(id),
            _ => None,
        }
    }

    /// Render this error as the CDP error frame sent to a client.
    ///
    /// The message is `"<CODE>: <text>"` with the protocol's server-error
    /// code, so automation libraries surface something greppable.
    pub fn to_cdp_frame(&self, id: MessageId) -> CdpFrame {
        CdpFrame::error_response(id, format!("{}: {}", self.code(), self))
    }

    /// Structured payload for operator-facing failure envelopes.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
            "deviceId": self.device_id(),
            "recoverable": self.recoverable(),
        })
    }
}

#[cfg(test)]
mod tests;
