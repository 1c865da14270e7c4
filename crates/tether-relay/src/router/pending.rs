//! In-flight request tracking.
//!
//! One table per device, keyed by `(connection id, message id)`. Ids are
//! forwarded verbatim, so two connections may race the same message id
//! against one device; responses consume entries in FIFO enqueue order for
//! that id, which keeps every response on a connection that actually asked.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tether_cdp::MessageId;
use uuid::Uuid;

use crate::backlog::Priority;

/// Identity of an in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingKey {
    /// Connection that issued the request.
    pub connection_id: Uuid,
    /// Message id the response will echo.
    pub message_id: MessageId,
}

/// Book-keeping for one in-flight request.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    /// Method name.
    pub method: String,
    /// Original frame text, kept for retransmission.
    pub raw: String,
    /// When the request was accepted.
    pub enqueued_at: Instant,
    /// When the request times out.
    pub deadline: Instant,
    /// Retries performed so far.
    pub retry_count: u32,
    /// Dispatch priority.
    pub priority: Priority,
}

/// Pending-request table for one device.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<PendingKey, PendingEntry>,
    by_message: HashMap<MessageId, VecDeque<Uuid>>,
}

impl PendingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of in-flight requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the exact key is in flight.
    pub fn contains(&self, key: &PendingKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Track a request. At most one entry per key: a duplicate is rejected
    /// and the table is unchanged.
    pub fn insert(&mut self, key: PendingKey, entry: PendingEntry) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.by_message
            .entry(key.message_id.clone())
            .or_default()
            .push_back(key.connection_id);
        self.entries.insert(key, entry);
        true
    }

    /// Consume the oldest entry enqueued under `message_id`.
    ///
    /// Exactly one response consumes one entry; a second response with the
    /// same id either consumes the next queued connection's entry or finds
    /// nothing and is dropped by the caller.
    pub fn consume(&mut self, message_id: &MessageId) -> Option<(PendingKey, PendingEntry)> {
        let queue = self.by_message.get_mut(message_id)?;
        while let Some(connection_id) = queue.pop_front() {
            let key = PendingKey {
                connection_id,
                message_id: message_id.clone(),
            };
            if let Some(entry) = self.entries.remove(&key) {
                if queue.is_empty() {
                    self.by_message.remove(message_id);
                }
                return Some((key, entry));
            }
        }
        self.by_message.remove(message_id);
        None
    }

    /// Remove one specific entry, keeping the per-id FIFO consistent.
    pub fn remove(&mut self, key: &PendingKey) -> Option<PendingEntry> {
        let entry = self.entries.remove(key)?;
        if let Some(queue) = self.by_message.get_mut(&key.message_id) {
            if let Some(pos) = queue.iter().position(|c| *c == key.connection_id) {
                queue.remove(pos);
            }
            if queue.is_empty() {
                self.by_message.remove(&key.message_id);
            }
        }
        Some(entry)
    }

    /// Re-track a request after a retry, preserving its key.
    pub fn reinsert(&mut self, key: PendingKey, entry: PendingEntry) {
        self.insert(key, entry);
    }

    /// Drop every entry owned by `connection_id`.
    ///
    /// Called when a client disconnects; later responses matching these
    /// entries are dropped silently.
    pub fn purge_connection(&mut self, connection_id: Uuid) -> Vec<(PendingKey, PendingEntry)> {
        let keys: Vec<PendingKey> = self
            .entries
            .keys()
            .filter(|key| key.connection_id == connection_id)
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|key| self.remove(&key).map(|entry| (key, entry)))
            .collect()
    }

    /// Keys whose deadline has passed.
    pub fn expired(&self, now: Instant) -> Vec<PendingKey> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Keys older than `ttl`, regardless of deadline or retries.
    pub fn older_than(&self, ttl: Duration, now: Instant) -> Vec<PendingKey> {
        self.entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.enqueued_at) >= ttl)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Remove and return everything in flight.
    pub fn drain(&mut self) -> Vec<(PendingKey, PendingEntry)> {
        self.by_message.clear();
        self.entries.drain().collect()
    }
}
