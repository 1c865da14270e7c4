//! Enhanced `/v2/control` endpoint.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde_json::json;
use tracing::{debug, info, warn};

use tether_cdp::{Envelope, envelope_types};

use crate::control;
use crate::transport::Transport;

use super::auth::check_token;
use super::{AppState, forward_command};

/// Upgrade handler for `/v2/control`.
pub async fn control_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    if let Err(rejection) = check_token(&params, &state.server_config.token) {
        return rejection.into_response();
    }
    ws.on_upgrade(move |socket| handle_control_socket(state, socket))
}

async fn handle_control_socket(state: AppState, socket: WebSocket) {
    let (transport, mut outbound_rx) = Transport::channel();
    let (mut ws_tx, mut ws_rx) = socket.split();

    info!(transport_id = %transport.id(), "Control socket connected");

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
                        handle_control_text(&state, &transport, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Control socket error");
                        break;
                    }
                }
            }
        }
    }

    debug!(transport_id = %transport.id(), "Control socket task ended");
}

async fn handle_control_text(state: &AppState, transport: &Transport, text: &str) {
    let envelope = match Envelope::parse(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Malformed control frame");
            send(transport, &Envelope::error("MALFORMED_FRAME", e.to_string()));
            return;
        }
    };

    match envelope.kind.as_str() {
        envelope_types::CONTROL_STATUS => {
            let report = control::status_report(&state.registry, &state.router, state.started_at);
            let reply = Envelope::reply_to(
                &envelope,
                envelope_types::CONTROL_STATUS_ACK,
                serde_json::to_value(report).unwrap_or_default(),
            );
            send(transport, &reply);
        }
        envelope_types::CONTROL_METRICS => {
            let report = control::metrics_report(&state.registry);
            let reply = Envelope::reply_to(
                &envelope,
                envelope_types::CONTROL_METRICS_ACK,
                json!({ "devices": report }),
            );
            send(transport, &reply);
        }
        envelope_types::CONTROL_COMMAND => {
            let data = match control::dispatch_command(&state.registry, &envelope.data).await {
                Ok(result) => json!({ "success": true, "result": result }),
                Err(e) => json!({ "success": false, "error": e.to_payload() }),
            };
            let reply =
                Envelope::reply_to(&envelope, envelope_types::CONTROL_COMMAND_ACK, data);
            send(transport, &reply);
        }
        other => {
            debug!(kind = %other, "Unknown control envelope type");
            send(
                transport,
                &Envelope::reply_to(
                    &envelope,
                    envelope_types::ERROR,
                    json!({
                        "code": "UNKNOWN_MESSAGE_TYPE",
                        "message": format!("unknown message type: {other}"),
                    }),
                ),
            );
        }
    }
}

fn send(transport: &Transport, envelope: &Envelope) {
    if let Err(e) = transport.try_send_text(envelope.to_text()) {
        debug!(error = %e, "Failed to queue control reply");
    }
}
