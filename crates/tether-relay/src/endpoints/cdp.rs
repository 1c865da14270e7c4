//! Legacy `/cdp` endpoint.
//!
//! Automation clients connect here with `deviceId` in the query string or
//! embedded in the path as `/key/value` pairs. A connection without a
//! device id is a broadcast subscriber (back-compat mode).

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::transport::{Transport, close_codes};

use super::auth::{AuthRejection, check_token, parse_path_params};
use super::{AppState, close_socket, forward_command};

/// Upgrade handler for `/cdp` with query-string parameters only.
pub async fn cdp_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, params, state)
}

/// Upgrade handler for `/cdp/{*params}` with path-embedded parameters.
///
/// Path pairs are merged under the query string: an explicit query value
/// wins over a path-embedded one.
pub async fn cdp_ws_with_path(
    ws: WebSocketUpgrade,
    Path(rest): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    let mut params = parse_path_params(&rest);
    params.extend(query);
    upgrade(ws, params, state)
}

fn upgrade(ws: WebSocketUpgrade, params: HashMap<String, String>, state: AppState) -> Response {
    if let Err(rejection) = check_token(&params, &state.server_config.token) {
        return rejection.into_response();
    }
    let limit = state.registry.config().max_concurrent_connections;
    if state.router.connection_count() >= limit {
        warn!(limit, "Refusing CDP upgrade at connection cap");
        return AuthRejection::MaxInstances.into_response();
    }

    let device_id = params.get("deviceId").cloned();
    ws.on_upgrade(move |socket| handle_cdp_socket(state, socket, device_id))
}

async fn handle_cdp_socket(state: AppState, socket: WebSocket, device_id: Option<String>) {
    // The target device must be connected at upgrade time.
    if let Some(id) = &device_id {
        if state.registry.get(id).is_none() {
            info!(device_id = %id, "Closing CDP socket, device not connected");
            close_socket(socket, close_codes::PROTOCOL_ERROR, "device not connected").await;
            return;
        }
    }

    let (transport, mut outbound_rx) = Transport::channel();
    let connection = state
        .router
        .register_connection(transport, device_id, true);
    let (mut ws_tx, mut ws_rx) = socket.split();

    info!(
        connection_id = %connection.id,
        device_id = ?connection.device_id,
        "CDP client connected"
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
                        state.router.handle_client_text(&connection, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(connection_id = %connection.id, error = %e, "CDP socket error");
                        break;
                    }
                }
            }
        }
    }

    state.router.unregister_connection(connection.id).await;
    debug!(connection_id = %connection.id, "CDP client disconnected");
}
