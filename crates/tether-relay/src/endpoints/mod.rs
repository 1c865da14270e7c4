//! WebSocket endpoint multiplexer.
//!
//! Two endpoint families share one registry and one router: the legacy
//! family (`/extension`, `/cdp`) and the enhanced family (`/v2/device`,
//! `/v2/cdp/{deviceId}`, `/v2/control`). Each endpoint is a thin
//! translation layer over the same engine; no state is duplicated between
//! them.

mod auth;
mod cdp;
mod control;
mod extension;
mod v2_cdp;
mod v2_device;

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::routing::get;
use futures_util::SinkExt;
use futures_util::stream::SplitSink;

use crate::config::ServerConfig;
use crate::registry::DeviceRegistry;
use crate::router::MessageRouter;
use crate::transport::TransportCommand;

pub use auth::parse_path_params;

/// Shared state behind every endpoint handler.
#[derive(Clone)]
pub struct AppState {
    /// Device registry.
    pub registry: Arc<DeviceRegistry>,
    /// Message router.
    pub router: Arc<MessageRouter>,
    /// Listener-level configuration (token, caps, v2 toggle).
    pub server_config: Arc<ServerConfig>,
    /// Server start time, for uptime reporting.
    pub started_at: Instant,
}

/// Build the axum router for both endpoint families.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/extension", get(extension::extension_ws))
        .route("/cdp", get(cdp::cdp_ws))
        .route("/cdp/{*params}", get(cdp::cdp_ws_with_path));

    if state.server_config.v2_enabled {
        router = router
            .route("/v2/device", get(v2_device::device_ws))
            .route("/v2/cdp", get(v2_cdp::cdp_ws_missing_id))
            .route("/v2/cdp/{device_id}", get(v2_cdp::cdp_ws))
            .route("/v2/control", get(control::control_ws));
    }

    router.with_state(state)
}

/// Push one transport command to a socket sink.
///
/// Returns `false` when the loop should end (close sent or sink gone).
pub(crate) async fn forward_command(
    sink: &mut SplitSink<WebSocket, Message>,
    command: TransportCommand,
) -> bool {
    match command {
        TransportCommand::Text(text) => sink.send(Message::Text(text.into())).await.is_ok(),
        TransportCommand::Close { code, reason } => {
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })))
                .await;
            false
        }
    }
}

/// Close a freshly-upgraded socket with a code, before any relaying starts.
pub(crate) async fn close_socket(mut socket: WebSocket, code: u16, reason: &str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}
