//! Upgrade-time authentication and parameter parsing.
//!
//! Every upgrade carries a shared bearer token, either as the `token` query
//! parameter or embedded in the path as `/key/value` pairs (the legacy
//! `/cdp` endpoint recognises `token`, `startingUrl`, and `launch`).

use std::collections::HashMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::debug;

/// Parameter keys the path-embedded form recognises.
const PATH_PARAM_KEYS: &[&str] = &["token", "startingUrl", "launch", "deviceId"];

/// Why an upgrade was refused before the WebSocket handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    /// No token supplied: HTTP 400.
    MissingToken,
    /// Token supplied but wrong: HTTP 403.
    WrongToken,
    /// Connection cap reached: HTTP 503.
    MaxInstances,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            Self::MissingToken => (StatusCode::BAD_REQUEST, "Missing token").into_response(),
            Self::WrongToken => (StatusCode::FORBIDDEN, "Invalid token").into_response(),
            Self::MaxInstances => {
                (StatusCode::SERVICE_UNAVAILABLE, "Max instances reached").into_response()
            }
        }
    }
}

/// Decode `/key/value` pairs embedded in a path remainder.
///
/// Values are URL-decoded; unrecognised keys are ignored. A trailing key
/// with no value is dropped.
pub fn parse_path_params(rest: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut segments = rest.split('/').filter(|segment| !segment.is_empty());
    while let Some(key) = segments.next() {
        let Some(value) = segments.next() else {
            debug!(key = %key, "Path parameter without a value, ignoring");
            break;
        };
        if !PATH_PARAM_KEYS.contains(&key) {
            continue;
        }
        let decoded = urlencoding::decode(value)
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| value.to_string());
        params.insert(key.to_string(), decoded);
    }
    params
}

/// Validate the shared token against merged query + path parameters.
///
/// # Errors
///
/// `MissingToken` (400) when no token was supplied, `WrongToken` (403) when
/// it does not match.
pub fn check_token(
    params: &HashMap<String, String>,
    expected: &str,
) -> Result<(), AuthRejection> {
    match params.get("token") {
        None => Err(AuthRejection::MissingToken),
        Some(token) if token == expected => Ok(()),
        Some(_) => Err(AuthRejection::WrongToken),
    }
}
