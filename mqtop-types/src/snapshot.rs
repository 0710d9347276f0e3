//! Snapshot - every queue the broker reported in one poll.

use crate::{QueueSnapshot, QueueSnapshotBuilder};

/// All queues reported by the broker in a single poll.
///
/// Snapshots are produced by the poller once per tick and handed to the
/// rate engine as-is; nothing downstream mutates them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Snapshot {
    /// Unix timestamp in milliseconds when this snapshot was taken.
    pub timestamp_ms: u64,

    /// Queues in the order the broker returned them.
    pub queues: Vec<QueueSnapshot>,
}

impl Snapshot {
    /// Create a snapshot stamped with the current time.
    ///
    /// Every queue is re-stamped with the snapshot time so that all rows of
    /// one poll share a single sample instant.
    pub fn now(queues: Vec<QueueSnapshot>) -> Self {
        Self::with_timestamp(current_timestamp_ms(), queues)
    }

    /// Create a snapshot with a specific timestamp.
    pub fn with_timestamp(timestamp_ms: u64, mut queues: Vec<QueueSnapshot>) -> Self {
        for queue in &mut queues {
            queue.sampled_at_ms = timestamp_ms;
        }
        Self {
            timestamp_ms,
            queues,
        }
    }

    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::new()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// Find a queue by name (first match across vhosts).
    pub fn get(&self, name: &str) -> Option<&QueueSnapshot> {
        self.queues.iter().find(|q| q.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueSnapshot> {
        self.queues.iter()
    }

    /// Total ready messages across all queues.
    pub fn total_ready(&self) -> u64 {
        self.queues.iter().map(|q| q.ready).sum()
    }
}

/// Builder for constructing [`Snapshot`] instances, mostly in tests.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    timestamp_ms: Option<u64>,
    queues: Vec<QueueSnapshot>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a specific timestamp (milliseconds since Unix epoch).
    pub fn timestamp_ms(mut self, ts: u64) -> Self {
        self.timestamp_ms = Some(ts);
        self
    }

    /// Add a queue built using a closure.
    pub fn queue<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(QueueSnapshotBuilder) -> QueueSnapshotBuilder,
    {
        self.queues.push(f(QueueSnapshotBuilder::new(name)).build());
        self
    }

    pub fn build(self) -> Snapshot {
        let ts = self.timestamp_ms.unwrap_or_else(current_timestamp_ms);
        Snapshot::with_timestamp(ts, self.queues)
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
