//! Per-device write backlog.
//!
//! Requests that cannot be written through to a device immediately are held
//! in a bounded three-bucket queue: FIFO within a priority, drained
//! high-to-low by the router's processor tick.

use std::collections::VecDeque;
use std::time::Instant;

use tether_cdp::MessageId;
use uuid::Uuid;

/// Dispatch priority for a routed method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Interactive calls a client is blocked on.
    High,
    /// Everything unclassified.
    Normal,
    /// Domain-enable chatter that can wait.
    Low,
}

impl Priority {
    /// Classify a CDP method.
    pub fn for_method(method: &str) -> Self {
        match method {
            "Runtime.evaluate" | "Page.navigate" | "Target.activateTarget" => Self::High,
            "Log.enable" | "Runtime.enable" | "Page.enable" => Self::Low,
            _ => Self::Normal,
        }
    }
}

/// A request parked in a device backlog.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    /// Connection that issued the request.
    pub connection_id: Uuid,
    /// Message id of the request.
    pub message_id: MessageId,
    /// Method name, kept for logging.
    pub method: String,
    /// Original frame text, written through verbatim on drain.
    pub raw: String,
    /// Dispatch priority.
    pub priority: Priority,
    /// When the command entered the backlog.
    pub queued_at: Instant,
}

/// Bounded priority backlog.
#[derive(Debug)]
pub struct CommandQueue {
    high: VecDeque<QueuedCommand>,
    normal: VecDeque<QueuedCommand>,
    low: VecDeque<QueuedCommand>,
    limit: usize,
}

impl CommandQueue {
    /// Create a backlog bounded at `limit` entries across all buckets.
    pub fn new(limit: usize) -> Self {
        Self {
            high: VecDeque::new(),
            normal: VecDeque::new(),
            low: VecDeque::new(),
            limit,
        }
    }

    /// Total queued entries.
    pub fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }

    /// Whether the backlog is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue a command.
    ///
    /// # Errors
    ///
    /// Returns the command back when the backlog is at capacity; existing
    /// entries are never evicted to make room.
    pub fn push(&mut self, command: QueuedCommand) -> Result<(), QueuedCommand> {
        if self.len() >= self.limit {
            return Err(command);
        }
        match command.priority {
            Priority::High => self.high.push_back(command),
            Priority::Normal => self.normal.push_back(command),
            Priority::Low => self.low.push_back(command),
        }
        Ok(())
    }

    /// Dequeue the next command, highest priority first, FIFO within one.
    pub fn pop(&mut self) -> Option<QueuedCommand> {
        self.high
            .pop_front()
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front())
    }

    /// Remove and return every queued command in dispatch order.
    pub fn drain(&mut self) -> Vec<QueuedCommand> {
        let mut all = Vec::with_capacity(self.len());
        while let Some(command) = self.pop() {
            all.push(command);
        }
        all
    }
}

#[cfg(test)]
mod tests;
