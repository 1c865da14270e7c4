//! Outbound transport handles.
//!
//! Each WebSocket task owns its sink; everything else holds a [`Transport`]
//! handle backed by an mpsc channel, so writes to any socket are serialised
//! by construction and never block the router's fast path.

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::RelayError;

/// Channel depth between the router and a socket task.
const TRANSPORT_BUFFER: usize = 64;

/// WebSocket close codes used by the relay.
pub mod close_codes {
    /// Administrative shutdown or orderly unregister.
    pub const NORMAL: u16 = 1000;
    /// Conflict eviction: a newer connection took over the device id.
    pub const GOING_AWAY: u16 = 1001;
    /// Legacy CDP endpoint: target device is not connected.
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// Enhanced CDP endpoint: device id missing from the path.
    pub const V2_MISSING_DEVICE_ID: u16 = 4000;
    /// Enhanced CDP endpoint: no such device.
    pub const V2_UNKNOWN_DEVICE: u16 = 4001;
    /// Enhanced CDP endpoint: device exists but is not ACTIVE.
    pub const V2_DEVICE_NOT_ACTIVE: u16 = 4002;
}

/// An instruction to a socket task.
#[derive(Debug, Clone)]
pub enum TransportCommand {
    /// Send a text frame.
    Text(String),
    /// Send a close frame and end the task.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Handle to the outbound half of a socket.
#[derive(Debug, Clone)]
pub struct Transport {
    id: Uuid,
    tx: mpsc::Sender<TransportCommand>,
}

impl Transport {
    /// Create a transport handle and the receiver its socket task drains.
    pub fn channel() -> (Self, mpsc::Receiver<TransportCommand>) {
        let (tx, rx) = mpsc::channel(TRANSPORT_BUFFER);
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    /// Identity of this transport; survives cloning the handle.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a text frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the socket task is gone or its buffer
    /// is full; the caller decides whether to backlog or fail the request.
    pub fn try_send_text(&self, text: impl Into<String>) -> Result<(), RelayError> {
        self.tx
            .try_send(TransportCommand::Text(text.into()))
            .map_err(|e| RelayError::Transport {
                reason: e.to_string(),
                device_id: None,
            })
    }

    /// Queue a text frame, waiting for buffer space.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the socket task is gone.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), RelayError> {
        self.tx
            .send(TransportCommand::Text(text.into()))
            .await
            .map_err(|e| RelayError::Transport {
                reason: e.to_string(),
                device_id: None,
            })
    }

    /// Ask the socket task to close with the given code. Best effort.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.try_send(TransportCommand::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Whether the socket task has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests;
