//! Relay configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Core relay tuning knobs.
///
/// All intervals are milliseconds on the wire; use the accessor methods for
/// [`Duration`] values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Expected device ping cadence.
    #[serde(rename = "heartbeatInterval", default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// How long a device may sit short of ACTIVE before eviction.
    #[serde(rename = "connectionTimeout", default = "default_connection_timeout")]
    pub connection_timeout_ms: u64,
    /// Deadline for a routed request before a timeout error is emitted.
    #[serde(rename = "messageTimeout", default = "default_message_timeout")]
    pub message_timeout_ms: u64,
    /// Bound on a device's write backlog.
    #[serde(rename = "maxQueueSize", default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Retry budget for a timed-out request.
    #[serde(rename = "maxRetries", default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for retry backoff (`retryDelay * 2^retry`, capped at 30 s).
    #[serde(rename = "retryDelay", default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Cap on concurrent client CDP connections.
    #[serde(rename = "maxConcurrentConnections", default = "default_max_connections")]
    pub max_concurrent_connections: usize,
    /// Cap on in-flight requests per device; overflow goes to the backlog.
    #[serde(rename = "maxConcurrentMessages", default = "default_max_messages")]
    pub max_concurrent_messages: usize,
    /// Cadence of the periodic metrics log line.
    #[serde(rename = "metricsInterval", default = "default_metrics_interval")]
    pub metrics_interval_ms: u64,
    /// Log every relayed frame at debug level.
    #[serde(rename = "enableDetailedLogging", default)]
    pub enable_detailed_logging: bool,
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

fn default_connection_timeout() -> u64 {
    30_000
}

fn default_message_timeout() -> u64 {
    5_000
}

fn default_max_queue_size() -> usize {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1_000
}

fn default_max_connections() -> usize {
    100
}

fn default_max_messages() -> usize {
    1_000
}

fn default_metrics_interval() -> u64 {
    60_000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval(),
            connection_timeout_ms: default_connection_timeout(),
            message_timeout_ms: default_message_timeout(),
            max_queue_size: default_max_queue_size(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            max_concurrent_connections: default_max_connections(),
            max_concurrent_messages: default_max_messages(),
            metrics_interval_ms: default_metrics_interval(),
            enable_detailed_logging: false,
        }
    }
}

impl RelayConfig {
    /// Expected device ping cadence.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Registration-to-ACTIVE grace period.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Per-request response deadline.
    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    /// Base retry delay.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Metrics log cadence.
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }

    /// Registry sweep cadence: `2 x heartbeatInterval`.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.saturating_mul(2))
    }

    /// Staleness bound: a device idle past `3 x heartbeatInterval` is evicted.
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.saturating_mul(3))
    }
}

/// Listener-level configuration for the server binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared bearer token required on every upgrade.
    #[serde(default = "default_token")]
    pub token: String,
    /// Whether the enhanced `/v2/*` endpoint family is mounted.
    #[serde(rename = "v2Enabled", default = "default_v2")]
    pub v2_enabled: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_token() -> String {
    "tether-dev-token".to_string()
}

fn default_v2() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            token: default_token(),
            v2_enabled: default_v2(),
        }
    }
}
