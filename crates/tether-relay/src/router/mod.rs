//! CDP message router.
//!
//! Delivers each client request to exactly one device, returns exactly one
//! response (or one error frame) to the originating client, and fans events
//! out to every client attached to the device. A shared processor task
//! ticks every 100 ms to expire deadlines, retry, garbage-collect, and
//! drain device backlogs.

mod local;
mod pending;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use tether_cdp::{CdpFrame, MessageId};

use crate::backlog::{Priority, QueuedCommand};
use crate::config::RelayConfig;
use crate::device::{ConnectionInfo, DeviceRecord};
use crate::error::RelayError;
use crate::registry::{DeviceRegistry, RegistryEvent};
use crate::transport::{Transport, close_codes};

pub use local::{LocalOutcome, PRODUCT, PROTOCOL_VERSION, USER_AGENT};
pub use pending::{PendingEntry, PendingKey, PendingTable};

/// Age at which a pending entry is garbage-collected even if its deadline
/// keeps moving (retries).
const PENDING_TTL: Duration = Duration::from_secs(60);

/// Processor tick period.
const TICK_PERIOD: Duration = Duration::from_millis(100);

/// Ceiling on the retry backoff.
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// A client speaking CDP to the relay.
#[derive(Debug)]
pub struct ClientConnection {
    /// Server-generated connection id (the transport's identity).
    pub id: Uuid,
    /// Outbound half of the client socket.
    pub transport: Transport,
    /// Device this connection routes to, when one was named.
    pub device_id: Option<String>,
    /// Whether this connection came in over the legacy endpoint family.
    /// Legacy connections without a device id are broadcast subscribers.
    pub legacy: bool,
    /// Accept time.
    pub created_at: DateTime<Utc>,
    /// Per-connection connection-info block, when one was reported.
    pub connection_info: RwLock<Option<ConnectionInfo>>,
}

/// The relay's message router.
pub struct MessageRouter {
    registry: Arc<DeviceRegistry>,
    config: RelayConfig,
    connections: DashMap<Uuid, Arc<ClientConnection>>,
    pending: DashMap<String, Arc<Mutex<PendingTable>>>,
}

impl MessageRouter {
    /// Create a router over the given registry.
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        let config = registry.config().clone();
        Self {
            registry,
            config,
            connections: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    /// Registry this router consults.
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Number of live client connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Sum of backlogged requests across devices.
    pub fn total_backlog(&self) -> usize {
        self.registry
            .get_all()
            .iter()
            .map(|device| device.with_backlog(|backlog| backlog.len()))
            .sum()
    }

    fn table(&self, device_id: &str) -> Arc<Mutex<PendingTable>> {
        self.pending
            .entry(device_id.to_string())
            .or_default()
            .clone()
    }

    /// Track a new client connection.
    pub fn register_connection(
        &self,
        transport: Transport,
        device_id: Option<String>,
        legacy: bool,
    ) -> Arc<ClientConnection> {
        let connection = Arc::new(ClientConnection {
            id: transport.id(),
            transport,
            device_id,
            legacy,
            created_at: Utc::now(),
            connection_info: RwLock::new(None),
        });
        debug!(
            connection_id = %connection.id,
            device_id = ?connection.device_id,
            legacy = connection.legacy,
            "CDP connection registered"
        );
        self.connections.insert(connection.id, connection.clone());
        connection
    }

    /// Drop a client connection and purge its pending entries.
    ///
    /// Responses that arrive for the purged entries are dropped silently;
    /// no cancellation is sent toward the extension.
    pub async fn unregister_connection(&self, connection_id: Uuid) {
        let Some((_, connection)) = self.connections.remove(&connection_id) else {
            return;
        };
        if let Some(device_id) = &connection.device_id {
            let table = self.table(device_id);
            let purged = table.lock().await.purge_connection(connection_id);
            if !purged.is_empty() {
                debug!(
                    connection_id = %connection_id,
                    device_id = %device_id,
                    purged = purged.len(),
                    "Purged pending entries for closed connection"
                );
            }
        }
        debug!(connection_id = %connection_id, "CDP connection unregistered");
    }

    /// Handle one text frame from a client connection.
    ///
    /// Parse failures are logged and dropped; the socket stays open.
    pub async fn handle_client_text(&self, connection: &Arc<ClientConnection>, text: &str) {
        if self.config.enable_detailed_logging {
            trace!(connection_id = %connection.id, frame = %text, "Client frame");
        }

        let frame = match CdpFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(connection_id = %connection.id, error = %e, "Dropping malformed client frame");
                return;
            }
        };

        if !frame.is_request() {
            debug!(
                connection_id = %connection.id,
                "Dropping non-request frame from client"
            );
            return;
        }

        let device = connection
            .device_id
            .as_deref()
            .and_then(|id| self.registry.get(id));

        match local::try_handle(&frame, device.as_deref()) {
            LocalOutcome::Handled(frames) => {
                for reply in frames {
                    self.send_to_connection(connection, &reply.to_text());
                }
            }
            LocalOutcome::Forward => {
                self.route_request(connection, device, frame, text).await;
            }
        }
    }

    /// Route a request through to the connection's device.
    async fn route_request(
        &self,
        connection: &Arc<ClientConnection>,
        device: Option<Arc<DeviceRecord>>,
        frame: CdpFrame,
        text: &str,
    ) {
        // is_request() guarantees both.
        let Some(message_id) = frame.id.clone() else { return };
        let Some(method) = frame.method.clone() else { return };

        let Some(device) = device else {
            let device_id = connection
                .device_id
                .clone()
                .unwrap_or_else(|| "unspecified".to_string());
            self.fail_request(connection, message_id, &RelayError::DeviceNotFound(device_id));
            return;
        };

        let state = device.state();
        if !state.accepts_routing() {
            self.fail_request(
                connection,
                message_id,
                &RelayError::DeviceNotActive {
                    device_id: device.id().to_string(),
                    state,
                },
            );
            return;
        }

        let key = PendingKey {
            connection_id: connection.id,
            message_id: message_id.clone(),
        };
        let priority = Priority::for_method(&method);
        let now = Instant::now();
        let entry = PendingEntry {
            method: method.clone(),
            raw: text.to_string(),
            enqueued_at: now,
            deadline: now + self.config.message_timeout(),
            retry_count: 0,
            priority,
        };

        let table = self.table(device.id());
        let mut table = table.lock().await;
        let in_flight = table.len();
        if !table.insert(key.clone(), entry) {
            warn!(
                connection_id = %connection.id,
                message_id = %message_id,
                "Duplicate message id while previous request is in flight"
            );
            self.fail_request(
                connection,
                message_id,
                &RelayError::Malformed("duplicate message id".to_string()),
            );
            return;
        }

        device.metrics.requests.fetch_add(1, Ordering::Relaxed);

        // Over the in-flight cap the request goes straight to the backlog.
        let write = if in_flight >= self.config.max_concurrent_messages {
            Err(RelayError::Transport {
                reason: "in-flight cap reached".to_string(),
                device_id: Some(device.id().to_string()),
            })
        } else {
            device.transport().try_send_text(text)
        };

        match write {
            Ok(()) => {
                device.metrics.messages_out.fetch_add(1, Ordering::Relaxed);
                device
                    .metrics
                    .bytes_out
                    .fetch_add(text.len() as u64, Ordering::Relaxed);
                trace!(
                    connection_id = %connection.id,
                    device_id = %device.id(),
                    method = %method,
                    "Request written through"
                );
            }
            Err(_) => {
                let queued = device.with_backlog(|backlog| {
                    backlog.push(QueuedCommand {
                        connection_id: connection.id,
                        message_id: message_id.clone(),
                        method: method.clone(),
                        raw: text.to_string(),
                        priority,
                        queued_at: Instant::now(),
                    })
                });
                if queued.is_err() {
                    table.remove(&key);
                    drop(table);
                    device.metrics.errors.fetch_add(1, Ordering::Relaxed);
                    self.fail_request(
                        connection,
                        message_id,
                        &RelayError::QueueFull {
                            device_id: device.id().to_string(),
                            limit: self.config.max_queue_size,
                        },
                    );
                    return;
                }
                debug!(
                    connection_id = %connection.id,
                    device_id = %device.id(),
                    method = %method,
                    "Write failed, request backlogged"
                );
            }
        }
    }

    /// Handle one CDP text frame from a device's extension socket.
    ///
    /// Frames with an id consume the matching pending entry and go to that
    /// one connection; frames without an id are events and fan out.
    pub async fn handle_device_text(&self, device_id: &str, text: &str) {
        let Some(device) = self.registry.get(device_id) else {
            debug!(device_id = %device_id, "Frame from unknown device dropped");
            return;
        };
        device.metrics.messages_in.fetch_add(1, Ordering::Relaxed);
        device
            .metrics
            .bytes_in
            .fetch_add(text.len() as u64, Ordering::Relaxed);
        device.touch_seen();

        if self.config.enable_detailed_logging {
            trace!(device_id = %device_id, frame = %text, "Device frame");
        }

        let frame = match CdpFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "Dropping malformed device frame");
                device.metrics.errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        if let Some(message_id) = frame.id {
            let table = self.table(device_id);
            let consumed = table.lock().await.consume(&message_id);
            match consumed {
                Some((key, entry)) => {
                    let latency_ms = entry.enqueued_at.elapsed().as_secs_f64() * 1000.0;
                    device.metrics.record_latency(latency_ms);
                    device.metrics.responses.fetch_add(1, Ordering::Relaxed);
                    if let Some(connection) = self.connections.get(&key.connection_id) {
                        self.send_to_connection(connection.value(), text);
                    } else {
                        // The client went away; the work is discarded.
                        debug!(
                            device_id = %device_id,
                            message_id = %message_id,
                            "Response for closed connection dropped"
                        );
                    }
                }
                None => {
                    debug!(
                        device_id = %device_id,
                        message_id = %message_id,
                        "Response with no matching pending entry dropped"
                    );
                }
            }
        } else {
            self.broadcast_event(device_id, text);
        }
    }

    /// Fan an event out to every connection attached to the device, plus
    /// legacy broadcast subscribers with no device id of their own.
    fn broadcast_event(&self, device_id: &str, text: &str) {
        let mut delivered = 0_usize;
        for entry in self.connections.iter() {
            let connection = entry.value();
            let subscribed = match &connection.device_id {
                Some(id) => id == device_id,
                None => connection.legacy,
            };
            if subscribed {
                self.send_to_connection(connection, text);
                delivered += 1;
            }
        }
        trace!(device_id = %device_id, delivered, "Event fan-out");
    }

    fn send_to_connection(&self, connection: &ClientConnection, text: &str) {
        if let Err(e) = connection.transport.try_send_text(text) {
            debug!(
                connection_id = %connection.id,
                error = %e,
                "Dropping frame for unwritable connection"
            );
        }
    }

    fn fail_request(
        &self,
        connection: &ClientConnection,
        message_id: MessageId,
        error: &RelayError,
    ) {
        debug!(
            connection_id = %connection.id,
            code = error.code(),
            "Failing request"
        );
        self.send_to_connection(connection, &error.to_cdp_frame(message_id).to_text());
    }

    /// Fail every in-flight request for a device and clear its backlog.
    pub async fn fail_device(&self, device_id: &str, reason: &str) {
        let Some((_, table)) = self.pending.remove(device_id) else {
            return;
        };
        let drained = table.lock().await.drain();
        if let Some(device) = self.registry.get(device_id) {
            device.with_backlog(|backlog| backlog.drain());
        }
        if drained.is_empty() {
            return;
        }
        warn!(
            device_id = %device_id,
            failed = drained.len(),
            reason = %reason,
            "Failing in-flight requests"
        );
        let error = RelayError::DeviceUnavailable {
            device_id: device_id.to_string(),
            reason: reason.to_string(),
        };
        for (key, _entry) in drained {
            if let Some(connection) = self.connections.get(&key.connection_id) {
                self.send_to_connection(
                    connection.value(),
                    &error.to_cdp_frame(key.message_id).to_text(),
                );
            }
        }
    }

    /// React to an extension socket closing.
    ///
    /// Only acts when the closing transport still owns the device: after a
    /// conflict eviction the old socket's teardown must not touch the new
    /// record, and its in-flight requests time out individually.
    pub async fn handle_device_disconnect(
        &self,
        device_id: &str,
        transport_id: Uuid,
        reason: &str,
    ) {
        let Some(device) = self.registry.get(device_id) else {
            return;
        };
        if device.transport().id() != transport_id {
            debug!(
                device_id = %device_id,
                "Stale extension socket closed after takeover, ignoring"
            );
            return;
        }
        self.fail_device(device_id, reason).await;
        if let Err(e) = self.registry.unregister(device_id).await {
            debug!(device_id = %device_id, error = %e, "Unregister on disconnect skipped");
        }
    }

    /// One processor pass: expire deadlines (retrying while budget remains),
    /// garbage-collect entries past the TTL, and drain device backlogs.
    pub async fn tick(&self) {
        let now = Instant::now();
        let device_ids: Vec<String> =
            self.pending.iter().map(|entry| entry.key().clone()).collect();

        for device_id in device_ids {
            let table = self.table(&device_id);
            let device = self.registry.get(&device_id);

            let mut table = table.lock().await;

            for key in table.older_than(PENDING_TTL, now) {
                if table.remove(&key).is_some() {
                    warn!(
                        device_id = %device_id,
                        message_id = %key.message_id,
                        "Pending entry exceeded TTL, garbage-collected"
                    );
                }
            }

            for key in table.expired(now) {
                let Some(entry) = table.remove(&key) else { continue };
                let budget_left = entry.retry_count < self.config.max_retries;
                match device.as_ref() {
                    Some(device)
                        if budget_left
                            && device.state().accepts_routing()
                            && !device.transport().is_closed() =>
                    {
                        let backoff = retry_backoff(self.config.retry_delay(), entry.retry_count);
                        let retried = PendingEntry {
                            deadline: now + self.config.message_timeout().max(backoff),
                            retry_count: entry.retry_count + 1,
                            ..entry
                        };
                        debug!(
                            device_id = %device_id,
                            message_id = %key.message_id,
                            retry = retried.retry_count,
                            "Retrying timed-out request"
                        );
                        if device.transport().try_send_text(&retried.raw).is_ok() {
                            device.metrics.messages_out.fetch_add(1, Ordering::Relaxed);
                        }
                        table.reinsert(key, retried);
                    }
                    _ => {
                        if let Some(device) = device.as_ref() {
                            device.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
                            device.metrics.errors.fetch_add(1, Ordering::Relaxed);
                        }
                        if let Some(connection) = self.connections.get(&key.connection_id) {
                            self.send_to_connection(
                                connection.value(),
                                &RelayError::MessageTimeout(self.config.message_timeout())
                                    .to_cdp_frame(key.message_id)
                                    .to_text(),
                            );
                        }
                    }
                }
            }

            // Drain this device's backlog while the transport accepts writes.
            if let Some(device) = device.as_ref() {
                if device.state().accepts_routing() {
                    loop {
                        let Some(command) = device.with_backlog(|backlog| backlog.pop()) else {
                            break;
                        };
                        let key = PendingKey {
                            connection_id: command.connection_id,
                            message_id: command.message_id.clone(),
                        };
                        // Consumed or evicted while queued; nothing to send.
                        if !table.contains(&key) {
                            continue;
                        }
                        if device.transport().try_send_text(&command.raw).is_ok() {
                            device.metrics.messages_out.fetch_add(1, Ordering::Relaxed);
                            device
                                .metrics
                                .bytes_out
                                .fetch_add(command.raw.len() as u64, Ordering::Relaxed);
                        } else {
                            // Transport still jammed; put it back and stop.
                            let _ = device.with_backlog(|backlog| backlog.push(command));
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Spawn the shared processor task.
    pub fn spawn_processor(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let router = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_PERIOD);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                router.tick().await;
            }
        })
    }

    /// Spawn the listener that fails in-flight work when the registry
    /// evicts a device (sweep, operator command, orderly disconnect).
    pub fn spawn_registry_listener(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let router = self;
        let mut events = router.registry.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(RegistryEvent::Unregistered { device_id }) => {
                        router.fail_device(&device_id, "device unregistered").await;
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Registry event listener lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Fail every pending request and close every client connection.
    /// Used during shutdown, before device transports are closed.
    pub async fn shutdown(&self) {
        let device_ids: Vec<String> =
            self.pending.iter().map(|entry| entry.key().clone()).collect();
        for device_id in device_ids {
            self.fail_device(&device_id, "Router cleanup").await;
        }
        for entry in self.connections.iter() {
            entry
                .value()
                .transport
                .close(close_codes::NORMAL, "server shutting down");
        }
        self.connections.clear();
    }
}

/// Exponential retry backoff: `retryDelay * 2^retry`, capped at 30 s.
fn retry_backoff(base: Duration, retry_count: u32) -> Duration {
    base.saturating_mul(2_u32.saturating_pow(retry_count))
        .min(MAX_RETRY_BACKOFF)
}
