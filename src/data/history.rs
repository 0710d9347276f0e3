//! Ready-depth history for the trend sparkline.

use std::collections::{HashMap, VecDeque};

use super::engine::{DisplayRow, QueueId};

/// Maximum number of samples kept per queue.
const MAX_HISTORY_SIZE: usize = 60;

/// Tracks recent ready counts per queue.
#[derive(Debug, Clone, Default)]
pub struct History {
    ready: HashMap<QueueId, VecDeque<u64>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest rows. Stale rows are skipped; queues no longer
    /// present in `rows` are forgotten.
    pub fn record(&mut self, rows: &[DisplayRow]) {
        self.ready.retain(|id, _| rows.iter().any(|r| r.name == id.name && r.vhost == id.vhost));

        for row in rows.iter().filter(|r| !r.stale) {
            let values = self.ready.entry(row.id()).or_default();
            values.push_back(row.ready);
            if values.len() > MAX_HISTORY_SIZE {
                values.pop_front();
            }
        }
    }

    /// Sparkline levels (0-7) for the last `width` samples of a queue.
    ///
    /// Returns an empty Vec if there's not enough history.
    pub fn ready_sparkline(&self, id: &QueueId, width: usize) -> Vec<u8> {
        let Some(values) = self.ready.get(id) else {
            return Vec::new();
        };

        if values.len() < 2 {
            return Vec::new();
        }

        let skip = values.len().saturating_sub(width);
        let window: Vec<u64> = values.iter().skip(skip).copied().collect();

        let max = window.iter().copied().max().unwrap_or(0);
        let min = window.iter().copied().min().unwrap_or(0);
        let range = (max - min).max(1) as f64;

        window
            .iter()
            .map(|&v| {
                let normalized = ((v - min) as f64 / range * 7.0) as u8;
                normalized.min(7)
            })
            .collect()
    }
}
