//! Enhanced `/v2/device` endpoint.
//!
//! Devices speak structured envelopes for registration, heartbeat, and
//! disconnect, and interleave raw CDP frames (no `type` field) on the same
//! socket; the CDP frames are router input. Only CDP frames ever travel
//! onward to clients, never envelopes.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use tether_cdp::{Envelope, ExtensionFrame, ExtensionMessage, envelope_types};

use crate::device::{ConnectionInfo, DeviceCapabilities, DeviceRecord, DeviceState};
use crate::error::RelayError;
use crate::transport::{Transport, close_codes};

use super::auth::check_token;
use super::{AppState, forward_command};

/// Upgrade handler for `/v2/device`.
pub async fn device_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    if let Err(rejection) = check_token(&params, &state.server_config.token) {
        return rejection.into_response();
    }
    ws.on_upgrade(move |socket| handle_device_socket(state, socket))
}

async fn handle_device_socket(state: AppState, socket: WebSocket) {
    let (transport, mut outbound_rx) = Transport::channel();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut bound_device: Option<String> = None;

    info!(transport_id = %transport.id(), "v2 device socket connected");

    loop {
        tokio::select! {
            Some(command) = outbound_rx.recv() => {
                if !forward_command(&mut ws_tx, command).await {
                    break;
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_device_text(&state, &transport, &mut bound_device, text.as_str())
                            .await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "v2 device socket error");
                        break;
                    }
                }
            }
        }
    }

    if let Some(device_id) = bound_device {
        state
            .router
            .handle_device_disconnect(&device_id, transport.id(), "device socket closed")
            .await;
    }
    debug!(transport_id = %transport.id(), "v2 device socket task ended");
}

async fn handle_device_text(
    state: &AppState,
    transport: &Transport,
    bound_device: &mut Option<String>,
    text: &str,
) {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        warn!("Dropping malformed v2 device frame");
        return;
    };

    match value.get("type").and_then(Value::as_str) {
        // Enveloped control traffic carries namespaced types.
        Some(kind) if kind.contains(':') => match Envelope::parse(text) {
            Ok(envelope) => {
                handle_envelope(state, transport, bound_device, &envelope).await;
            }
            Err(e) => {
                warn!(kind = %kind, error = %e, "Dropping malformed envelope");
                send(transport, &Envelope::error("MALFORMED_FRAME", e.to_string()));
            }
        },
        // Plain-typed control messages reuse the legacy vocabulary.
        Some(_) => match ExtensionFrame::parse(text) {
            Ok(ExtensionFrame::Control(message)) => {
                handle_legacy_control(state, bound_device, message);
            }
            Ok(ExtensionFrame::Cdp(_)) => {}
            Err(e) => {
                warn!(error = %e, "Dropping malformed control message");
            }
        },
        // No type field: raw CDP from the browser, router input.
        None => {
            let Some(device_id) = bound_device.as_deref() else {
                debug!("CDP frame before v2 registration, dropping");
                return;
            };
            state.router.handle_device_text(device_id, text).await;
        }
    }
}

async fn handle_envelope(
    state: &AppState,
    transport: &Transport,
    bound_device: &mut Option<String>,
    envelope: &Envelope,
) {
    match envelope.kind.as_str() {
        envelope_types::DEVICE_REGISTER => {
            match register_device(state, transport, envelope).await {
                Ok(device_id) => {
                    *bound_device = Some(device_id.clone());
                    let ack = Envelope::reply_to(
                        envelope,
                        envelope_types::DEVICE_REGISTER_ACK,
                        json!({
                            "deviceId": device_id,
                            "state": DeviceState::Active,
                            "heartbeatInterval": state.registry.config().heartbeat_interval_ms,
                        }),
                    );
                    send(transport, &ack);
                }
                Err(e) => {
                    warn!(error = %e, "v2 registration rejected");
                    send(
                        transport,
                        &Envelope::reply_to(
                            envelope,
                            envelope_types::ERROR,
                            e.to_payload(),
                        ),
                    );
                }
            }
        }
        envelope_types::DEVICE_HEARTBEAT => {
            let device_id = envelope
                .data
                .get("deviceId")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| bound_device.clone());
            if let Some(device_id) = device_id {
                let _ = state.registry.update_last_heartbeat(&device_id);
            }
            let ack = Envelope::reply_to(
                envelope,
                envelope_types::DEVICE_HEARTBEAT_ACK,
                json!({
                    "serverTime": Utc::now(),
                    "status": "ok",
                }),
            );
            send(transport, &ack);
        }
        envelope_types::DEVICE_DISCONNECT => {
            if let Some(device_id) = bound_device.take() {
                info!(device_id = %device_id, "v2 device disconnecting");
                if let Err(e) = state.registry.unregister(&device_id).await {
                    debug!(device_id = %device_id, error = %e, "Unregister on disconnect failed");
                }
            }
            transport.close(close_codes::NORMAL, "device disconnected");
        }
        other => {
            debug!(kind = %other, "Unknown envelope type");
            send(
                transport,
                &Envelope::reply_to(
                    envelope,
                    envelope_types::ERROR,
                    RelayError::UnknownType(other.to_string()).to_payload(),
                ),
            );
        }
    }
}

/// Validate capabilities and walk the record AUTHENTICATING -> REGISTERED
/// -> ACTIVE.
async fn register_device(
    state: &AppState,
    transport: &Transport,
    envelope: &Envelope,
) -> Result<String, RelayError> {
    let device_id = envelope
        .data
        .get("deviceId")
        .and_then(Value::as_str)
        .ok_or(RelayError::MissingField("deviceId"))?
        .to_string();
    let device_info = envelope
        .data
        .get("deviceInfo")
        .ok_or(RelayError::MissingField("deviceInfo"))?;
    let capabilities: DeviceCapabilities = serde_json::from_value(device_info.clone())
        .map_err(|e| RelayError::Malformed(e.to_string()))?;
    capabilities.validate()?;

    let record = DeviceRecord::new(
        &device_id,
        capabilities,
        transport.clone(),
        DeviceState::Authenticating,
        state.registry.config().max_queue_size,
    );
    state.registry.register(record).await?;
    state
        .registry
        .update_state(&device_id, DeviceState::Registered)
        .await?;
    state
        .registry
        .update_state(&device_id, DeviceState::Active)
        .await?;
    info!(device_id = %device_id, "v2 device active");
    Ok(device_id)
}

/// Legacy control messages accepted on the v2 socket (`connection_info`,
/// `ping`/`pong` from older extensions).
fn handle_legacy_control(
    state: &AppState,
    bound_device: &mut Option<String>,
    message: ExtensionMessage,
) {
    match message {
        ExtensionMessage::ConnectionInfo {
            device_id,
            session_id,
            target_info,
        } => {
            let resolved = device_id.or_else(|| bound_device.clone());
            let Some(resolved) = resolved else {
                warn!("connection_info before v2 registration, dropping");
                return;
            };
            if let Some(device) = state.registry.get(&resolved) {
                device.set_connection_info(ConnectionInfo {
                    session_id,
                    target_info,
                });
                let _ = state.registry.update_last_seen(&resolved);
            }
        }
        ExtensionMessage::Ping { device_id } | ExtensionMessage::Pong { device_id, .. } => {
            let _ = state.registry.update_last_heartbeat(&device_id);
        }
        ExtensionMessage::DeviceRegister { .. } => {
            debug!("Legacy device_register on v2 socket ignored; use device:register");
        }
    }
}

fn send(transport: &Transport, envelope: &Envelope) {
    if let Err(e) = transport.try_send_text(envelope.to_text()) {
        debug!(error = %e, "Failed to queue envelope");
    }
}
