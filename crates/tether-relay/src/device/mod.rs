//! Device records and capability descriptors.

mod state;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tether_cdp::{DeviceInfo, TargetInfo};

use crate::backlog::CommandQueue;
use crate::error::RelayError;
use crate::transport::Transport;

pub use state::DeviceState;

/// Smoothing factor for the response-latency moving average.
const LATENCY_ALPHA: f64 = 0.1;

/// Capability descriptor a device presents at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapabilities {
    /// Extension display name.
    #[serde(default)]
    pub name: String,
    /// Extension version.
    #[serde(default)]
    pub version: String,
    /// Browser user agent.
    #[serde(default)]
    pub user_agent: String,
    /// Browser product name.
    #[serde(default)]
    pub browser_name: String,
    /// Browser product version.
    #[serde(default)]
    pub browser_version: String,
    /// Operating system / platform string.
    #[serde(default)]
    pub platform: String,
    /// CDP domains the extension claims to tunnel.
    #[serde(default)]
    pub supported_domains: Vec<String>,
    /// Concurrent request budget the extension advertises.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: u32,
    /// Feature flags.
    #[serde(default)]
    pub features: HashMap<String, bool>,
}

fn default_max_concurrent_requests() -> u32 {
    10
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: String::new(),
            user_agent: String::new(),
            browser_name: String::new(),
            browser_version: String::new(),
            platform: String::new(),
            supported_domains: Vec::new(),
            max_concurrent_requests: default_max_concurrent_requests(),
            features: HashMap::new(),
        }
    }
}

impl DeviceCapabilities {
    /// Build a minimal descriptor from a legacy `device_register` payload.
    ///
    /// The legacy path never validates; absent fields stay empty.
    pub fn from_device_info(info: &DeviceInfo) -> Self {
        Self {
            name: info.name.clone(),
            version: info.version.clone(),
            user_agent: info.user_agent.clone(),
            ..Self::default()
        }
    }

    /// Validate the descriptor against the v2 registration requirements.
    ///
    /// # Errors
    ///
    /// Returns `INVALID_CAPABILITIES` naming the first offending field.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.browser_name.trim().is_empty() {
            return Err(RelayError::InvalidCapabilities(
                "browserName must be non-empty".to_string(),
            ));
        }
        if self.browser_version.trim().is_empty() {
            return Err(RelayError::InvalidCapabilities(
                "browserVersion must be non-empty".to_string(),
            ));
        }
        if self.platform.trim().is_empty() {
            return Err(RelayError::InvalidCapabilities(
                "platform must be non-empty".to_string(),
            ));
        }
        if self.user_agent.trim().is_empty() {
            return Err(RelayError::InvalidCapabilities(
                "userAgent must be non-empty".to_string(),
            ));
        }
        if self.max_concurrent_requests == 0 {
            return Err(RelayError::InvalidCapabilities(
                "maxConcurrentRequests must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Target descriptor plus session id the extension reports once its
/// debugger is attached to a tab. Required to synthesize `Target.*` and
/// `Page.getFrameTree` replies locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// CDP session id for the attached target.
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// Target descriptor.
    #[serde(rename = "targetInfo")]
    pub target_info: TargetInfo,
}

#[derive(Debug, Default)]
struct LatencyStats {
    ewma_ms: f64,
    last_ms: f64,
    samples: u64,
}

/// Per-device traffic counters and latency tracking.
#[derive(Debug, Default)]
pub struct DeviceMetrics {
    /// Frames received from the extension.
    pub messages_in: AtomicU64,
    /// Frames written to the extension.
    pub messages_out: AtomicU64,
    /// Bytes received from the extension.
    pub bytes_in: AtomicU64,
    /// Bytes written to the extension.
    pub bytes_out: AtomicU64,
    /// Errors attributed to this device.
    pub errors: AtomicU64,
    /// Requests routed to this device.
    pub requests: AtomicU64,
    /// Responses correlated back to clients.
    pub responses: AtomicU64,
    /// Requests that expired waiting for a response.
    pub timeouts: AtomicU64,
    /// Times a newer connection took over this device id.
    pub reconnects: AtomicU64,
    latency: Mutex<LatencyStats>,
}

impl DeviceMetrics {
    /// Fold a completed round-trip into the moving average.
    pub fn record_latency(&self, sample_ms: f64) {
        let mut stats = self.latency.lock();
        stats.last_ms = sample_ms;
        if stats.samples == 0 {
            stats.ewma_ms = sample_ms;
        } else {
            stats.ewma_ms = LATENCY_ALPHA * sample_ms + (1.0 - LATENCY_ALPHA) * stats.ewma_ms;
        }
        stats.samples += 1;
    }

    /// Exponentially-weighted average response latency.
    pub fn average_latency_ms(&self) -> f64 {
        self.latency.lock().ewma_ms
    }

    /// Most recent response latency.
    pub fn last_latency_ms(&self) -> f64 {
        self.latency.lock().last_ms
    }

    /// Serializable snapshot for the control plane.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (ewma_ms, last_ms) = {
            let stats = self.latency.lock();
            (stats.ewma_ms, stats.last_ms)
        };
        MetricsSnapshot {
            messages_in: self.messages_in.load(Ordering::Relaxed),
            messages_out: self.messages_out.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            responses: self.responses.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            average_response_ms: ewma_ms,
            last_response_ms: last_ms,
        }
    }
}

/// Point-in-time copy of [`DeviceMetrics`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Frames received from the extension.
    pub messages_in: u64,
    /// Frames written to the extension.
    pub messages_out: u64,
    /// Bytes received from the extension.
    pub bytes_in: u64,
    /// Bytes written to the extension.
    pub bytes_out: u64,
    /// Errors attributed to this device.
    pub errors: u64,
    /// Requests routed to this device.
    pub requests: u64,
    /// Responses correlated back to clients.
    pub responses: u64,
    /// Requests that expired waiting for a response.
    pub timeouts: u64,
    /// Conflict takeovers.
    pub reconnects: u64,
    /// Moving-average response latency.
    pub average_response_ms: f64,
    /// Most recent response latency.
    pub last_response_ms: f64,
}

/// A registered device.
///
/// The registry is the sole owner; every other component holds the device
/// id and looks the record up per use. Mutable fields sit behind short
/// parking_lot locks so lookups never block on async work.
#[derive(Debug)]
pub struct DeviceRecord {
    id: String,
    capabilities: DeviceCapabilities,
    transport: RwLock<Transport>,
    state: RwLock<DeviceState>,
    registered_at: Instant,
    registered_wall: DateTime<Utc>,
    last_seen: RwLock<Instant>,
    last_heartbeat: RwLock<Instant>,
    connection_info: RwLock<Option<ConnectionInfo>>,
    backlog: Mutex<CommandQueue>,
    /// Traffic counters.
    pub metrics: DeviceMetrics,
}

impl DeviceRecord {
    /// Create a record in the given initial state.
    pub fn new(
        id: impl Into<String>,
        capabilities: DeviceCapabilities,
        transport: Transport,
        initial_state: DeviceState,
        queue_limit: usize,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: id.into(),
            capabilities,
            transport: RwLock::new(transport),
            state: RwLock::new(initial_state),
            registered_at: now,
            registered_wall: Utc::now(),
            last_seen: RwLock::new(now),
            last_heartbeat: RwLock::new(now),
            connection_info: RwLock::new(None),
            backlog: Mutex::new(CommandQueue::new(queue_limit)),
            metrics: DeviceMetrics::default(),
        }
    }

    /// Device identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Capability descriptor presented at registration.
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DeviceState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, next: DeviceState) {
        *self.state.write() = next;
    }

    /// Handle to the extension socket currently bound to this device.
    pub fn transport(&self) -> Transport {
        self.transport.read().clone()
    }

    pub(crate) fn replace_transport(&self, next: Transport) -> Transport {
        std::mem::replace(&mut *self.transport.write(), next)
    }

    /// Registration wall-clock time.
    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_wall
    }

    /// Time since registration.
    pub fn uptime(&self) -> Duration {
        self.registered_at.elapsed()
    }

    /// Time since the device last showed any sign of life.
    pub fn idle(&self) -> Duration {
        self.last_seen.read().elapsed()
    }

    /// Time since the last heartbeat ping.
    pub fn heartbeat_idle(&self) -> Duration {
        self.last_heartbeat.read().elapsed()
    }

    /// Refresh the last-seen mark. Idempotent.
    pub fn touch_seen(&self) {
        *self.last_seen.write() = Instant::now();
    }

    /// Refresh the heartbeat mark (and last-seen with it). Idempotent.
    pub fn touch_heartbeat(&self) {
        let now = Instant::now();
        *self.last_heartbeat.write() = now;
        *self.last_seen.write() = now;
    }

    /// The connection-info block, when the extension has reported one.
    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.connection_info.read().clone()
    }

    /// Install or replace the connection-info block.
    pub fn set_connection_info(&self, info: ConnectionInfo) {
        *self.connection_info.write() = Some(info);
    }

    /// Run `f` against the write backlog.
    pub fn with_backlog<R>(&self, f: impl FnOnce(&mut CommandQueue) -> R) -> R {
        f(&mut self.backlog.lock())
    }

    /// Summary used by device listings and the control plane.
    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            id: self.id.clone(),
            state: self.state(),
            registered_at: self.registered_wall,
            uptime_seconds: self.uptime().as_secs(),
            idle_ms: self.idle().as_millis() as u64,
            queued: self.with_backlog(|backlog| backlog.len()),
            capabilities: self.capabilities.clone(),
            target_url: self
                .connection_info()
                .map(|info| info.target_info.url),
        }
    }
}

/// Serializable device listing row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    /// Device identifier.
    pub id: String,
    /// Lifecycle state.
    pub state: DeviceState,
    /// Registration wall-clock time.
    pub registered_at: DateTime<Utc>,
    /// Seconds since registration.
    pub uptime_seconds: u64,
    /// Milliseconds since last activity.
    pub idle_ms: u64,
    /// Backlogged request count.
    pub queued: usize,
    /// Capability descriptor.
    pub capabilities: DeviceCapabilities,
    /// URL of the attached tab, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
}

#[cfg(test)]
mod tests;
