//! Device registry.
//!
//! The registry is the single source of truth for which transport owns a
//! device. All structural mutations go through a per-device advisory lock;
//! lookups read the map directly and never block.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::device::{DeviceRecord, DeviceState};
use crate::error::RelayError;
use crate::transport::close_codes;

/// Bound on how long a mutation may wait for the per-device lock.
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Buffer size for the registry event channel.
const EVENT_CHANNEL_SIZE: usize = 256;

/// Lifecycle notifications emitted by the registry.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A device record was installed.
    Registered {
        /// Device id.
        device_id: String,
    },
    /// A device moved along the state machine.
    StateChanged {
        /// Device id.
        device_id: String,
        /// Previous state.
        old: DeviceState,
        /// New state.
        new: DeviceState,
    },
    /// A device record was removed.
    Unregistered {
        /// Device id.
        device_id: String,
    },
    /// A newer connection took over an id; the old transport was closed
    /// with code 1001.
    Conflict {
        /// Device id.
        device_id: String,
    },
}

/// Aggregate registry statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    /// Registered device count.
    pub total: usize,
    /// Device counts keyed by state name.
    pub by_state: HashMap<String, usize>,
    /// Mean uptime across devices, seconds.
    pub average_uptime_seconds: f64,
    /// Frames relayed in either direction, summed over devices.
    pub total_messages: u64,
}

/// Authoritative map of device id to device record.
pub struct DeviceRegistry {
    config: RelayConfig,
    devices: DashMap<String, Arc<DeviceRecord>>,
    by_transport: DashMap<Uuid, String>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new(config: RelayConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            config,
            devices: DashMap::new(),
            by_transport: DashMap::new(),
            locks: DashMap::new(),
            events,
        }
    }

    /// Subscribe to registry lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Relay configuration this registry runs under.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    fn emit(&self, event: RegistryEvent) {
        // No subscribers is fine; drop the event.
        let _ = self.events.send(event);
    }

    async fn acquire(&self, device_id: &str) -> Result<tokio::sync::OwnedMutexGuard<()>, RelayError> {
        let lock = self
            .locks
            .entry(device_id.to_string())
            .or_default()
            .clone();
        timeout(LOCK_TIMEOUT, lock.lock_owned())
            .await
            .map_err(|_| RelayError::LockTimeout {
                device_id: device_id.to_string(),
            })
    }

    /// Install a device record.
    ///
    /// The record must be in CONNECTING or AUTHENTICATING. A prior record
    /// under the same id loses the conflict: its transport is closed with
    /// code 1001 and the indexes swap to the new record atomically.
    ///
    /// # Errors
    ///
    /// `INVALID_REGISTRATION_STATE` for a record past AUTHENTICATING, or
    /// `LOCK_TIMEOUT` when the per-device lock is contended for over 5 s.
    pub async fn register(&self, record: DeviceRecord) -> Result<Arc<DeviceRecord>, RelayError> {
        let state = record.state();
        if !state.accepts_registration() {
            return Err(RelayError::InvalidRegistrationState {
                device_id: record.id().to_string(),
                state,
            });
        }

        let device_id = record.id().to_string();
        let _guard = self.acquire(&device_id).await?;

        let record = Arc::new(record);
        if let Some((_, existing)) = self.devices.remove(&device_id) {
            let old_transport = existing.transport();
            self.by_transport.remove(&old_transport.id());
            if old_transport.id() == record.transport().id() {
                // The same socket registering again; refresh quietly.
                debug!(device_id = %device_id, "Re-registration over the same socket");
                record.metrics.reconnects.store(
                    existing.metrics.reconnects.load(Ordering::Relaxed),
                    Ordering::Relaxed,
                );
            } else {
                warn!(
                    device_id = %device_id,
                    old_state = %existing.state(),
                    "Duplicate registration, evicting previous connection"
                );
                old_transport.close(close_codes::GOING_AWAY, "new connection established");
                existing.set_state(DeviceState::Closed);
                record.metrics.reconnects.store(
                    existing.metrics.reconnects.load(Ordering::Relaxed) + 1,
                    Ordering::Relaxed,
                );
                self.emit(RegistryEvent::Conflict {
                    device_id: device_id.clone(),
                });
            }
        }

        self.by_transport
            .insert(record.transport().id(), device_id.clone());
        self.devices.insert(device_id.clone(), record.clone());
        info!(device_id = %device_id, state = %record.state(), "Device registered");
        self.emit(RegistryEvent::Registered { device_id });
        Ok(record)
    }

    /// Move a device along the state machine.
    ///
    /// Refreshes the last-seen mark and emits a state-changed event.
    ///
    /// # Errors
    ///
    /// `DEVICE_NOT_FOUND`, `INVALID_STATE_TRANSITION`, or `LOCK_TIMEOUT`.
    pub async fn update_state(
        &self,
        device_id: &str,
        next: DeviceState,
    ) -> Result<(), RelayError> {
        let _guard = self.acquire(device_id).await?;
        let record = self
            .devices
            .get(device_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RelayError::DeviceNotFound(device_id.to_string()))?;

        let old = record.state();
        if !old.can_transition_to(next) {
            return Err(RelayError::InvalidStateTransition {
                device_id: device_id.to_string(),
                from: old,
                to: next,
            });
        }
        record.set_state(next);
        record.touch_seen();
        debug!(device_id = %device_id, old = %old, new = %next, "Device state changed");
        self.emit(RegistryEvent::StateChanged {
            device_id: device_id.to_string(),
            old,
            new: next,
        });
        Ok(())
    }

    /// Refresh a device's last-seen mark. Idempotent.
    ///
    /// # Errors
    ///
    /// `DEVICE_NOT_FOUND` when the id is not registered.
    pub fn update_last_seen(&self, device_id: &str) -> Result<(), RelayError> {
        let record = self
            .devices
            .get(device_id)
            .ok_or_else(|| RelayError::DeviceNotFound(device_id.to_string()))?;
        record.touch_seen();
        Ok(())
    }

    /// Refresh a device's heartbeat and last-seen marks. Idempotent.
    ///
    /// # Errors
    ///
    /// `DEVICE_NOT_FOUND` when the id is not registered.
    pub fn update_last_heartbeat(&self, device_id: &str) -> Result<(), RelayError> {
        let record = self
            .devices
            .get(device_id)
            .ok_or_else(|| RelayError::DeviceNotFound(device_id.to_string()))?;
        record.touch_heartbeat();
        Ok(())
    }

    /// Look up a device by id.
    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceRecord>> {
        self.devices.get(device_id).map(|entry| entry.value().clone())
    }

    /// Look up a device by the identity of its extension transport.
    pub fn get_by_connection_id(&self, transport_id: Uuid) -> Option<Arc<DeviceRecord>> {
        let device_id = self.by_transport.get(&transport_id)?.value().clone();
        self.get(&device_id)
    }

    /// Snapshot every device currently in `state`.
    pub fn get_by_state(&self, state: DeviceState) -> Vec<Arc<DeviceRecord>> {
        self.devices
            .iter()
            .filter(|entry| entry.value().state() == state)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Snapshot every registered device.
    pub fn get_all(&self) -> Vec<Arc<DeviceRecord>> {
        self.devices.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Remove a device: DISCONNECTING, drop indexes, close the transport
    /// with code 1000, CLOSED, emit the unregistered event.
    ///
    /// # Errors
    ///
    /// `DEVICE_NOT_FOUND` or `LOCK_TIMEOUT`.
    pub async fn unregister(&self, device_id: &str) -> Result<(), RelayError> {
        let _guard = self.acquire(device_id).await?;
        let Some((_, record)) = self.devices.remove(device_id) else {
            return Err(RelayError::DeviceNotFound(device_id.to_string()));
        };

        let state = record.state();
        if state.can_transition_to(DeviceState::Disconnecting) {
            record.set_state(DeviceState::Disconnecting);
        }
        let transport = record.transport();
        self.by_transport.remove(&transport.id());
        transport.close(close_codes::NORMAL, "device unregistered");
        record.set_state(DeviceState::Closed);
        drop(_guard);
        self.locks.remove(device_id);

        info!(device_id = %device_id, "Device unregistered");
        self.emit(RegistryEvent::Unregistered {
            device_id: device_id.to_string(),
        });
        Ok(())
    }

    /// Aggregate totals across the registry.
    pub fn stats(&self) -> RegistryStats {
        let mut by_state: HashMap<String, usize> = HashMap::new();
        let mut total_uptime = 0.0_f64;
        let mut total_messages = 0_u64;
        let mut total = 0_usize;

        for entry in self.devices.iter() {
            total += 1;
            *by_state.entry(entry.state().to_string()).or_default() += 1;
            total_uptime += entry.uptime().as_secs_f64();
            total_messages += entry.metrics.messages_in.load(Ordering::Relaxed)
                + entry.metrics.messages_out.load(Ordering::Relaxed);
        }

        RegistryStats {
            total,
            by_state,
            average_uptime_seconds: if total == 0 {
                0.0
            } else {
                total_uptime / total as f64
            },
            total_messages,
        }
    }

    /// One sweep pass: evict devices that stopped heartbeating, and devices
    /// that never made it to ACTIVE within the connection timeout.
    pub async fn sweep(&self) {
        let stale_after = self.config.stale_after();
        let connection_timeout = self.config.connection_timeout();

        let mut evict = Vec::new();
        for entry in self.devices.iter() {
            let idle = entry.idle();
            let state = entry.state();
            if idle > stale_after {
                warn!(
                    device_id = %entry.id(),
                    idle_ms = idle.as_millis() as u64,
                    "Device stale by heartbeat criterion, evicting"
                );
                evict.push(entry.id().to_string());
            } else if matches!(
                state,
                DeviceState::Connecting | DeviceState::Authenticating | DeviceState::Error
            ) && idle > connection_timeout
            {
                warn!(
                    device_id = %entry.id(),
                    state = %state,
                    "Device stuck short of ACTIVE, evicting"
                );
                evict.push(entry.id().to_string());
            }
        }

        for device_id in evict {
            if let Err(e) = self.unregister(&device_id).await {
                debug!(device_id = %device_id, error = %e, "Sweep eviction skipped");
            }
        }
    }

    /// Spawn the periodic sweep task at `2 x heartbeatInterval`.
    pub fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = self;
        let period = registry.config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.sweep().await;
            }
        })
    }

    /// Close every device transport with code 1000 and clear the registry.
    /// Used during shutdown, after client connections are closed.
    pub fn close_all(&self) {
        for entry in self.devices.iter() {
            let transport = entry.transport();
            transport.close(close_codes::NORMAL, "server shutting down");
            entry.set_state(DeviceState::Closed);
        }
        self.devices.clear();
        self.by_transport.clear();
        self.locks.clear();
    }
}

#[cfg(test)]
mod tests;
