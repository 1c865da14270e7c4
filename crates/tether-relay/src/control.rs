//! Operator-facing reports and commands.
//!
//! Backs the `/v2/control` endpoint: health snapshots, per-device route
//! metrics, and the small command set (`listDevices`, `disconnectDevice`,
//! `getDeviceMetrics`). Command failures are structured payloads, never
//! a closed socket.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::device::MetricsSnapshot;
use crate::error::RelayError;
use crate::registry::{DeviceRegistry, RegistryStats};
use crate::router::MessageRouter;

/// Health snapshot returned by `control:status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Relay version.
    pub version: String,
    /// Seconds since the server started.
    pub uptime_seconds: u64,
    /// Device totals by state.
    pub devices: RegistryStats,
    /// Live client connection count.
    pub clients: usize,
    /// Resident set size, when the platform exposes it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_rss_bytes: Option<u64>,
    /// Requests parked in device backlogs.
    pub queued: usize,
    /// Mean of per-device moving-average latencies.
    pub average_response_ms: f64,
    /// Errors per routed request, 0 to 1.
    pub error_rate: f64,
}

/// Build the health snapshot.
pub fn status_report(
    registry: &Arc<DeviceRegistry>,
    router: &Arc<MessageRouter>,
    started_at: Instant,
) -> StatusReport {
    let devices = registry.get_all();
    let mut latency_sum = 0.0_f64;
    let mut latency_count = 0_usize;
    let mut errors = 0_u64;
    let mut requests = 0_u64;
    for device in &devices {
        let average = device.metrics.average_latency_ms();
        if average > 0.0 {
            latency_sum += average;
            latency_count += 1;
        }
        errors += device.metrics.errors.load(Ordering::Relaxed);
        requests += device.metrics.requests.load(Ordering::Relaxed);
    }

    StatusReport {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: started_at.elapsed().as_secs(),
        devices: registry.stats(),
        clients: router.connection_count(),
        memory_rss_bytes: resident_memory_bytes(),
        queued: router.total_backlog(),
        average_response_ms: if latency_count == 0 {
            0.0
        } else {
            latency_sum / latency_count as f64
        },
        error_rate: if requests == 0 {
            0.0
        } else {
            errors as f64 / requests as f64
        },
    }
}

/// Per-device route metrics, keyed by device id.
pub fn metrics_report(registry: &Arc<DeviceRegistry>) -> HashMap<String, MetricsSnapshot> {
    registry
        .get_all()
        .iter()
        .map(|device| (device.id().to_string(), device.metrics.snapshot()))
        .collect()
}

/// Dispatch one operator command.
///
/// # Errors
///
/// `MISSING_FIELD` for an absent command or argument, `UNKNOWN_COMMAND`
/// for anything outside the command set, and whatever the underlying
/// registry operation raises.
pub async fn dispatch_command(
    registry: &Arc<DeviceRegistry>,
    data: &Value,
) -> Result<Value, RelayError> {
    let command = data
        .get("command")
        .and_then(Value::as_str)
        .ok_or(RelayError::MissingField("command"))?;

    match command {
        "listDevices" => {
            let devices: Vec<_> = registry
                .get_all()
                .iter()
                .map(|device| device.summary())
                .collect();
            Ok(json!({ "devices": devices }))
        }
        "disconnectDevice" => {
            let device_id = command_device_id(data)?;
            registry.unregister(device_id).await?;
            Ok(json!({ "deviceId": device_id, "disconnected": true }))
        }
        "getDeviceMetrics" => {
            let device_id = command_device_id(data)?;
            let device = registry
                .get(device_id)
                .ok_or_else(|| RelayError::DeviceNotFound(device_id.to_string()))?;
            Ok(json!({
                "deviceId": device_id,
                "metrics": device.metrics.snapshot(),
            }))
        }
        other => Err(RelayError::UnknownCommand(other.to_string())),
    }
}

/// Accept `deviceId` either at the top of the payload or under `args`.
fn command_device_id(data: &Value) -> Result<&str, RelayError> {
    data.get("deviceId")
        .or_else(|| data.get("args").and_then(|args| args.get("deviceId")))
        .and_then(Value::as_str)
        .ok_or(RelayError::MissingField("deviceId"))
}

/// Resident set size from /proc; the page size is taken as 4 KiB.
#[cfg(target_os = "linux")]
fn resident_memory_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident * 4096)
}

#[cfg(not(target_os = "linux"))]
fn resident_memory_bytes() -> Option<u64> {
    None
}
