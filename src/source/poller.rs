//! Timer-driven snapshot poller.
//!
//! Runs as its own task. A watch channel carries the [`PollControl`]; the
//! render loop flips `enabled` when the tunnel goes up or down, changes the
//! interval, or bumps `force_generation` for an immediate refresh. Fetches
//! are strictly serialized.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use mqtop_types::Snapshot;

use super::{PollError, StatsSource};
use crate::data::duration::format_duration;
use crate::session::SessionEvent;

/// Poller settings shared over a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollControl {
    pub interval: Duration,
    pub enabled: bool,
    /// Incremented to request an immediate fetch.
    pub force_generation: u64,
}

impl PollControl {
    pub fn new(interval: Duration, enabled: bool) -> Self {
        Self {
            interval,
            enabled,
            force_generation: 0,
        }
    }
}

/// Render-side handle for steering the poller task.
#[derive(Debug, Clone)]
pub struct PollerHandle {
    control: watch::Sender<PollControl>,
}

impl PollerHandle {
    pub fn set_interval(&self, interval: Duration) {
        self.control.send_if_modified(|c| {
            let changed = c.interval != interval;
            c.interval = interval;
            changed
        });
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.control.send_if_modified(|c| {
            let changed = c.enabled != enabled;
            c.enabled = enabled;
            changed
        });
    }

    /// Fetch as soon as the in-flight poll (if any) finishes.
    pub fn force(&self) {
        self.control.send_modify(|c| c.force_generation += 1);
    }
}

/// One bounded fetch, classified.
pub async fn poll_once(source: &dyn StatsSource, timeout: Duration) -> Result<Snapshot, PollError> {
    match tokio::time::timeout(timeout, source.fetch()).await {
        Ok(result) => result.map_err(PollError::from),
        Err(_) => Err(PollError::Transient(format!(
            "poll timed out after {}",
            format_duration(timeout)
        ))),
    }
}

/// Spawn the poller task. Outcomes arrive as [`SessionEvent::Poll`].
pub fn spawn_poller(
    source: Arc<dyn StatsSource>,
    poll_timeout: Duration,
    initial: PollControl,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
) -> (PollerHandle, JoinHandle<()>) {
    let (tx, rx) = watch::channel(initial);
    let task = tokio::spawn(run(source, poll_timeout, rx, events, cancel));
    (PollerHandle { control: tx }, task)
}

async fn run(
    source: Arc<dyn StatsSource>,
    poll_timeout: Duration,
    mut control: watch::Receiver<PollControl>,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
) {
    let mut due = true;

    loop {
        let current = *control.borrow_and_update();

        if current.enabled && due {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = poll_once(source.as_ref(), poll_timeout) => outcome,
            };
            match &outcome {
                Ok(snapshot) => debug!(queues = snapshot.len(), "poll ok"),
                Err(e) => warn!(error = %e, "poll failed"),
            }
            if events.send(SessionEvent::Poll(outcome)).await.is_err() {
                break;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(current.interval), if current.enabled => {
                due = true;
            }
            changed = control.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = *control.borrow();
                due = next.force_generation != current.force_generation
                    || (next.enabled && !current.enabled);
            }
        }
    }

    debug!("poller stopped");
}
