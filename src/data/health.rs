//! Queue depth health levels.

use serde::Serialize;

/// Ready-count thresholds for coloring the depth column.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Ready count above which a queue is in warning state.
    pub ready_warning: u64,
    /// Ready count above which a queue is critical.
    pub ready_critical: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            ready_warning: 100,
            ready_critical: 1000,
        }
    }
}

impl Thresholds {
    /// Classify a ready count. Both bounds are exclusive.
    pub fn classify(&self, ready: u64) -> HealthStatus {
        if ready > self.ready_critical {
            HealthStatus::Critical
        } else if ready > self.ready_warning {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Health status for a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}
