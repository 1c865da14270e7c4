//! Legacy `/extension` endpoint.
//!
//! The extension opens one socket and speaks `type`-discriminated control
//! messages (`device_register`, `ping`, `connection_info`) interleaved with
//! raw CDP frames. Either a `device_register` or a first `ping` initialises
//! the device record and moves it to ACTIVE.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use tether_cdp::{DeviceInfo, ExtensionFrame, ExtensionMessage};

use crate::device::{ConnectionInfo, DeviceCapabilities, DeviceRecord, DeviceState};
use crate::transport::Transport;

use super::auth::check_token;
use super::{AppState, forward_command};

/// Upgrade handler for `/extension`.
pub async fn extension_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    if let Err(rejection) = check_token(&params, &state.server_config.token) {
        return rejection.into_response();
    }
    ws.on_upgrade(move |socket| handle_extension_socket(state, socket))
}

async fn handle_extension_socket(state: AppState, socket: WebSocket) {
    let (transport, mut outbound_rx) = Transport::channel();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut bound_device: Option<String> = None;

    info!(transport_id = %transport.id(), "Extension socket connected");

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
                        handle_extension_text(&state, &transport, &mut bound_device, text.as_str())
                            .await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Extension socket error");
                        break;
                    }
                }
            }
        }
    }

    if let Some(device_id) = bound_device {
        state
            .router
            .handle_device_disconnect(&device_id, transport.id(), "extension socket closed")
            .await;
    }
    debug!(transport_id = %transport.id(), "Extension socket task ended");
}

async fn handle_extension_text(
    state: &AppState,
    transport: &Transport,
    bound_device: &mut Option<String>,
    text: &str,
) {
    let frame = match ExtensionFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            // One malformed frame must not kill the session.
            warn!(error = %e, "Dropping malformed extension frame");
            return;
        }
    };

    match frame {
        ExtensionFrame::Control(ExtensionMessage::DeviceRegister { device_id, device_info }) => {
            register_legacy_device(state, transport, bound_device, &device_id, &device_info).await;
        }
        ExtensionFrame::Control(ExtensionMessage::Ping { device_id }) => {
            // A ping from an unknown device also initialises it.
            if state.registry.get(&device_id).is_none() {
                register_legacy_device(
                    state,
                    transport,
                    bound_device,
                    &device_id,
                    &DeviceInfo::default(),
                )
                .await;
            }
            let _ = state.registry.update_last_heartbeat(&device_id);
            let pong = ExtensionMessage::pong(&device_id, Utc::now().timestamp_millis());
            if let Err(e) = transport.try_send_text(pong.to_text()) {
                debug!(device_id = %device_id, error = %e, "Failed to queue pong");
            }
        }
        ExtensionFrame::Control(ExtensionMessage::Pong { device_id, .. }) => {
            let _ = state.registry.update_last_heartbeat(&device_id);
        }
        ExtensionFrame::Control(ExtensionMessage::ConnectionInfo {
            device_id,
            session_id,
            target_info,
        }) => {
            let resolved = device_id.or_else(|| bound_device.clone());
            let Some(resolved) = resolved else {
                warn!("connection_info before registration, dropping");
                return;
            };
            if let Some(device) = state.registry.get(&resolved) {
                debug!(
                    device_id = %resolved,
                    session_id = %session_id,
                    url = %target_info.url,
                    "Connection info updated"
                );
                device.set_connection_info(ConnectionInfo {
                    session_id,
                    target_info,
                });
                let _ = state.registry.update_last_seen(&resolved);
            }
        }
        ExtensionFrame::Cdp(_) => {
            let Some(device_id) = bound_device.as_deref() else {
                debug!("CDP frame before registration, dropping");
                return;
            };
            state.router.handle_device_text(device_id, text).await;
        }
    }
}

/// Install a legacy device record and walk it to ACTIVE.
async fn register_legacy_device(
    state: &AppState,
    transport: &Transport,
    bound_device: &mut Option<String>,
    device_id: &str,
    device_info: &DeviceInfo,
) {
    let record = DeviceRecord::new(
        device_id,
        DeviceCapabilities::from_device_info(device_info),
        transport.clone(),
        DeviceState::Connecting,
        state.registry.config().max_queue_size,
    );
    if let Err(e) = state.registry.register(record).await {
        warn!(device_id = %device_id, error = %e, "Legacy registration failed");
        return;
    }
    for next in [
        DeviceState::Authenticating,
        DeviceState::Registered,
        DeviceState::Active,
    ] {
        if let Err(e) = state.registry.update_state(device_id, next).await {
            warn!(device_id = %device_id, error = %e, "Legacy activation failed");
            return;
        }
    }
    *bound_device = Some(device_id.to_string());
    info!(device_id = %device_id, "Legacy device active");
}
