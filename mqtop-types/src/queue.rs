//! Per-queue state as reported by the broker at one sample time.

/// One broker-reported queue state at a sample time.
///
/// The publish and deliver counters are the broker's own cumulative totals.
/// They only grow while the broker is up and drop back to zero when it
/// restarts, so consumers must not assume monotonicity across samples.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QueueSnapshot {
    /// Queue name.
    pub name: String,

    /// Virtual host the queue lives in.
    pub vhost: String,

    /// Messages ready for delivery.
    pub ready: u64,

    /// Messages delivered but not yet acknowledged.
    pub unacked: u64,

    /// Number of attached consumers.
    pub consumers: u32,

    /// Cumulative publish count reported by the broker.
    pub published: u64,

    /// Cumulative deliver/get count reported by the broker.
    pub delivered: u64,

    /// Sample time in milliseconds since the Unix epoch.
    pub sampled_at_ms: u64,
}

impl QueueSnapshot {
    /// Create a builder for a queue with the given name.
    pub fn builder(name: impl Into<String>) -> QueueSnapshotBuilder {
        QueueSnapshotBuilder::new(name)
    }

    /// Total messages held by the queue (ready + unacked).
    pub fn depth(&self) -> u64 {
        self.ready.saturating_add(self.unacked)
    }
}

/// Builder for [`QueueSnapshot`].
#[derive(Debug)]
pub struct QueueSnapshotBuilder {
    queue: QueueSnapshot,
}

impl QueueSnapshotBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            queue: QueueSnapshot {
                name: name.into(),
                vhost: "/".to_string(),
                ..QueueSnapshot::default()
            },
        }
    }

    pub fn vhost(mut self, vhost: impl Into<String>) -> Self {
        self.queue.vhost = vhost.into();
        self
    }

    pub fn ready(mut self, ready: u64) -> Self {
        self.queue.ready = ready;
        self
    }

    pub fn unacked(mut self, unacked: u64) -> Self {
        self.queue.unacked = unacked;
        self
    }

    pub fn consumers(mut self, consumers: u32) -> Self {
        self.queue.consumers = consumers;
        self
    }

    pub fn published(mut self, published: u64) -> Self {
        self.queue.published = published;
        self
    }

    pub fn delivered(mut self, delivered: u64) -> Self {
        self.queue.delivered = delivered;
        self
    }

    pub fn sampled_at_ms(mut self, ts: u64) -> Self {
        self.queue.sampled_at_ms = ts;
        self
    }

    pub fn build(self) -> QueueSnapshot {
        self.queue
    }
}
