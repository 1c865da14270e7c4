//! Locally-synthesized CDP methods.
//!
//! A handful of methods are answered by the relay itself so automation
//! clients see a compliant top-level browser target without the extension
//! having to implement them. Everything else is forwarded verbatim.

use serde_json::{Value, json};
use url::Url;

use tether_cdp::CdpFrame;

use crate::device::{ConnectionInfo, DeviceRecord};

/// Protocol version reported by `Browser.getVersion`.
pub const PROTOCOL_VERSION: &str = "1.3";
/// Product string reported by `Browser.getVersion`.
pub const PRODUCT: &str = "Chrome/Extension-Bridge";
/// User agent reported by `Browser.getVersion`.
pub const USER_AGENT: &str = "Browser-Go-Extension-Bridge/1.0.0";

/// Result of offering a request to the local handlers.
#[derive(Debug)]
pub enum LocalOutcome {
    /// Answered locally; deliver these frames to the client, in order.
    Handled(Vec<CdpFrame>),
    /// Not a local method (or missing prerequisites); forward to the device.
    Forward,
}

/// Offer a client request to the local handlers.
///
/// `device` is the connection's target device, when one is registered; the
/// `Target.*` and `Page.getFrameTree` synthesis depends on its
/// connection-info block.
pub fn try_handle(frame: &CdpFrame, device: Option<&DeviceRecord>) -> LocalOutcome {
    let (Some(id), Some(method)) = (frame.id.clone(), frame.method.as_deref()) else {
        return LocalOutcome::Forward;
    };

    match method {
        "Browser.getVersion" => LocalOutcome::Handled(vec![CdpFrame::response(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "product": PRODUCT,
                "userAgent": USER_AGENT,
            }),
        )]),

        "Browser.setDownloadBehavior" => {
            LocalOutcome::Handled(vec![CdpFrame::response(id, json!({}))])
        }

        "Target.setAutoAttach" => {
            // Only the top-level auto-attach is simulated; session-scoped
            // requests go to the browser untouched.
            if frame.session_id.is_some() {
                return LocalOutcome::Forward;
            }
            let Some(info) = device.and_then(DeviceRecord::connection_info) else {
                return LocalOutcome::Forward;
            };
            let mut target_info = info.target_info.clone();
            target_info.attached = Some(true);
            let attached = CdpFrame::event(
                "Target.attachedToTarget",
                json!({
                    "sessionId": info.session_id,
                    "targetInfo": target_info,
                    "waitingForDebugger": false,
                }),
            );
            LocalOutcome::Handled(vec![attached, CdpFrame::response(id, json!({}))])
        }

        "Target.getTargets" => {
            let target_infos = match device.and_then(DeviceRecord::connection_info) {
                Some(info) => {
                    vec![serde_json::to_value(info.target_info).unwrap_or(Value::Null)]
                }
                None => Vec::new(),
            };
            LocalOutcome::Handled(vec![CdpFrame::response(
                id,
                json!({ "targetInfos": target_infos }),
            )])
        }

        "Page.getFrameTree" => match device.and_then(DeviceRecord::connection_info) {
            Some(info) => {
                LocalOutcome::Handled(vec![CdpFrame::response(id, frame_tree(&info))])
            }
            None => LocalOutcome::Forward,
        },

        _ => LocalOutcome::Forward,
    }
}

/// Build the single-frame tree for the attached tab.
fn frame_tree(info: &ConnectionInfo) -> Value {
    let target_id = &info.target_info.target_id;
    let url_text = &info.target_info.url;
    let parsed = Url::parse(url_text).ok();

    // Opaque origins (about:blank) and parse failures both serialize "null".
    let security_origin = parsed
        .as_ref()
        .map_or_else(|| "null".to_string(), |u| u.origin().ascii_serialization());
    let domain = parsed
        .as_ref()
        .and_then(Url::host_str)
        .unwrap_or_default()
        .to_string();
    let secure = parsed.as_ref().is_some_and(|u| u.scheme() == "https");

    json!({
        "frameTree": {
            "frame": {
                "id": target_id,
                "loaderId": format!("{target_id}_loader"),
                "url": url_text,
                "domainAndRegistry": domain,
                "securityOrigin": security_origin,
                "mimeType": "text/html",
                "secureContextType": if secure { "Secure" } else { "Insecure" },
                "crossOriginIsolatedContextType": "NotIsolated",
                "gatedAPIFeatures": [],
            },
            "childFrames": [],
        }
    })
}
