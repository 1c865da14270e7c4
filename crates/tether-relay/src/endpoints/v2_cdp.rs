//! Enhanced `/v2/cdp/{deviceId}` endpoint.
//!
//! Client-only: the device id is mandatory and the device must be ACTIVE.
//! Close codes encode the refusal: 4000 missing id, 4001 unknown device,
//! 4002 device not active. Inbound frames must be raw CDP; enveloped
//! frames are dropped.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::transport::{Transport, close_codes};

use super::auth::check_token;
use super::{AppState, close_socket, forward_command};

/// Upgrade handler for `/v2/cdp` without a device id: closes 4000.
pub async fn cdp_ws_missing_id(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    if let Err(rejection) = check_token(&params, &state.server_config.token) {
        return rejection.into_response();
    }
    ws.on_upgrade(|socket| async {
        close_socket(socket, close_codes::V2_MISSING_DEVICE_ID, "device id required").await;
    })
}

/// Upgrade handler for `/v2/cdp/{deviceId}`.
pub async fn cdp_ws(
    ws: WebSocketUpgrade,
    Path(device_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    if let Err(rejection) = check_token(&params, &state.server_config.token) {
        return rejection.into_response();
    }
    ws.on_upgrade(move |socket| handle_cdp_socket(state, socket, device_id))
}

async fn handle_cdp_socket(state: AppState, socket: WebSocket, device_id: String) {
    if device_id.trim().is_empty() {
        close_socket(socket, close_codes::V2_MISSING_DEVICE_ID, "device id required").await;
        return;
    }
    let Some(device) = state.registry.get(&device_id) else {
        info!(device_id = %device_id, "Closing v2 CDP socket, unknown device");
        close_socket(socket, close_codes::V2_UNKNOWN_DEVICE, "unknown device").await;
        return;
    };
    let device_state = device.state();
    if !device_state.accepts_routing() {
        info!(device_id = %device_id, state = %device_state, "Closing v2 CDP socket, device not active");
        close_socket(socket, close_codes::V2_DEVICE_NOT_ACTIVE, "device not active").await;
        return;
    }

    let (transport, mut outbound_rx) = Transport::channel();
    let connection = state
        .router
        .register_connection(transport, Some(device_id.clone()), false);
    let (mut ws_tx, mut ws_rx) = socket.split();

    info!(
        connection_id = %connection.id,
        device_id = %device_id,
        "v2 CDP client connected"
    );

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
                        // Enveloped frames are control-plane traffic and do
                        // not belong on the CDP data path.
                        if has_type_field(text.as_str()) {
                            debug!(connection_id = %connection.id, "Dropping enveloped frame on v2 CDP socket");
                            continue;
                        }
                        state.router.handle_client_text(&connection, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(connection_id = %connection.id, error = %e, "v2 CDP socket error");
                        break;
                    }
                }
            }
        }
    }

    state.router.unregister_connection(connection.id).await;
    debug!(connection_id = %connection.id, "v2 CDP client disconnected");
}

fn has_type_field(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .ok()
        .is_some_and(|value| value.get("type").is_some())
}
