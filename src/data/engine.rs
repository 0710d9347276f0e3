//! Rate and session-delta computation over successive snapshots.
//!
//! The broker reports cumulative `publish` and `deliver_get` counters that
//! reset to zero when it restarts. The engine turns them into per-second
//! rates and session deltas (messages since this monitor started) that keep
//! climbing across such resets.
//!
//! ```text
//! t=0  pub=100   ->  rate: warming up   session Δ: 0
//! t=1  pub=110   ->  rate: 10/s         session Δ: 10
//! t=2  pub=0     ->  rate: 0/s (reset)  session Δ: 10
//! t=3  pub=5     ->  rate: 5/s          session Δ: 15
//! ```

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use mqtop_types::{current_timestamp_ms, QueueSnapshot, Snapshot};

use super::health::{HealthStatus, Thresholds};

/// Queue identity. Ordered by name, then vhost.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct QueueId {
    pub name: String,
    pub vhost: String,
}

impl QueueId {
    pub fn new(name: impl Into<String>, vhost: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vhost: vhost.into(),
        }
    }

    fn of(queue: &QueueSnapshot) -> Self {
        Self::new(queue.name.clone(), queue.vhost.clone())
    }
}

/// Session accounting for one cumulative broker counter.
#[derive(Debug, Clone, Copy)]
pub struct CounterTrack {
    /// Cumulative value that corresponds to a session delta of zero.
    /// Goes negative when a reset is rebased onto the accumulated delta.
    start: i64,
    last: u64,
    delta: u64,
    rate: Option<f64>,
}

impl CounterTrack {
    fn first(cumulative: u64) -> Self {
        Self {
            start: cumulative as i64,
            last: cumulative,
            delta: 0,
            rate: None,
        }
    }

    /// Fold in a new cumulative reading. Returns true when a reset was detected.
    fn advance(&mut self, cumulative: u64, dt_secs: f64) -> bool {
        if cumulative < self.last {
            self.start = cumulative as i64 - self.delta as i64;
            self.last = cumulative;
            self.rate = Some(0.0);
            return true;
        }

        if dt_secs > 0.0 {
            self.rate = Some((cumulative - self.last) as f64 / dt_secs);
        }
        self.last = cumulative;
        self.delta = (cumulative as i64 - self.start).max(0) as u64;
        false
    }

    /// Messages counted since the session began.
    pub fn delta(&self) -> u64 {
        self.delta
    }

    /// Messages per second over the last interval, `None` while warming up.
    pub fn rate(&self) -> Option<f64> {
        self.rate
    }
}

/// Per-queue accumulator, mutated only by [`Engine::update`].
#[derive(Debug, Clone)]
pub struct QueueSessionState {
    pub last: QueueSnapshot,
    pub published: CounterTrack,
    pub delivered: CounterTrack,
    /// Consecutive snapshots this queue was missing from.
    pub missed_ticks: u32,
    reset_this_tick: bool,
}

impl QueueSessionState {
    fn new(queue: &QueueSnapshot) -> Self {
        Self {
            last: queue.clone(),
            published: CounterTrack::first(queue.published),
            delivered: CounterTrack::first(queue.delivered),
            missed_ticks: 0,
            reset_this_tick: false,
        }
    }

    fn observe(&mut self, queue: &QueueSnapshot) {
        let dt_ms = queue.sampled_at_ms as i64 - self.last.sampled_at_ms as i64;
        let dt_secs = dt_ms as f64 / 1000.0;

        let pub_reset = self.published.advance(queue.published, dt_secs);
        let del_reset = self.delivered.advance(queue.delivered, dt_secs);
        self.reset_this_tick = pub_reset || del_reset;

        self.last = queue.clone();
        self.missed_ticks = 0;
    }

    fn row(&self, id: &QueueId, thresholds: &Thresholds) -> DisplayRow {
        DisplayRow {
            name: id.name.clone(),
            vhost: id.vhost.clone(),
            ready: self.last.ready,
            unacked: self.last.unacked,
            consumers: self.last.consumers,
            pub_rate: self.published.rate(),
            del_rate: self.delivered.rate(),
            pub_delta: self.published.delta(),
            del_delta: self.delivered.delta(),
            stale: self.missed_ticks > 0,
            reset: self.reset_this_tick,
            health: thresholds.classify(self.last.ready),
        }
    }
}

/// All session accumulators for one run of the monitor.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub queues: BTreeMap<QueueId, QueueSessionState>,
    /// Wall-clock start of the session (ms since epoch).
    pub started_at_ms: u64,
    last_sample_ms: Option<u64>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            queues: BTreeMap::new(),
            started_at_ms: current_timestamp_ms(),
            last_sample_ms: None,
        }
    }
}

/// One display-ready table row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayRow {
    pub name: String,
    pub vhost: String,
    pub ready: u64,
    pub unacked: u64,
    pub consumers: u32,
    pub pub_rate: Option<f64>,
    pub del_rate: Option<f64>,
    pub pub_delta: u64,
    pub del_delta: u64,
    pub stale: bool,
    pub reset: bool,
    pub health: HealthStatus,
}

impl DisplayRow {
    pub fn id(&self) -> QueueId {
        QueueId::new(self.name.clone(), self.vhost.clone())
    }
}

/// Sums across all tracked queues.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionTotals {
    pub queues: usize,
    pub ready: u64,
    pub pub_delta: u64,
    pub del_delta: u64,
    pub pub_rate: f64,
    pub del_rate: f64,
    pub started_at_ms: u64,
}

/// Converts snapshots into display rows, owning the [`SessionState`].
#[derive(Debug, Clone)]
pub struct Engine {
    session: SessionState,
    grace_ticks: u32,
    thresholds: Thresholds,
}

impl Engine {
    pub fn new(grace_ticks: u32, thresholds: Thresholds) -> Self {
        Self {
            session: SessionState::new(),
            grace_ticks,
            thresholds,
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Fold a snapshot into the session and return rows sorted by queue identity.
    ///
    /// Snapshots arrive in poll order. A timestamp that went backwards (wall
    /// clock stepped) still folds in the counters; only the rate keeps its
    /// previous value, as for any non-positive interval.
    pub fn update(&mut self, snapshot: &Snapshot) -> Vec<DisplayRow> {
        if let Some(last) = self.session.last_sample_ms {
            if snapshot.timestamp_ms < last {
                warn!(
                    sample = snapshot.timestamp_ms,
                    last, "sample clock went backwards"
                );
            }
        }
        self.session.last_sample_ms = Some(snapshot.timestamp_ms);

        let mut seen = Vec::with_capacity(snapshot.len());
        for queue in snapshot.iter() {
            let id = QueueId::of(queue);
            match self.session.queues.get_mut(&id) {
                Some(state) => {
                    state.observe(queue);
                    if state.reset_this_tick {
                        debug!(queue = %id.name, vhost = %id.vhost, "counter reset detected");
                    }
                }
                None => {
                    self.session.queues.insert(id.clone(), QueueSessionState::new(queue));
                }
            }
            seen.push(id);
        }
        seen.sort();

        let grace = self.grace_ticks;
        self.session.queues.retain(|id, state| {
            if seen.binary_search(id).is_ok() {
                return true;
            }
            state.missed_ticks += 1;
            state.reset_this_tick = false;
            let keep = state.missed_ticks <= grace;
            if !keep {
                debug!(queue = %id.name, vhost = %id.vhost, "queue gone, dropping session state");
            }
            keep
        });

        self.rows()
    }

    /// Current rows without folding in a new snapshot.
    pub fn rows(&self) -> Vec<DisplayRow> {
        self.session
            .queues
            .iter()
            .map(|(id, state)| state.row(id, &self.thresholds))
            .collect()
    }

    /// True when any tracked queue saw a counter reset on the latest tick.
    pub fn reset_detected(&self) -> bool {
        self.session.queues.values().any(|q| q.reset_this_tick)
    }

    pub fn totals(&self) -> SessionTotals {
        let mut totals = SessionTotals {
            started_at_ms: self.session.started_at_ms,
            ..Default::default()
        };
        for state in self.session.queues.values() {
            totals.queues += 1;
            totals.ready += state.last.ready;
            totals.pub_delta += state.published.delta();
            totals.del_delta += state.delivered.delta();
            totals.pub_rate += state.published.rate().unwrap_or(0.0);
            totals.del_rate += state.delivered.rate().unwrap_or(0.0);
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(ts_secs: u64, queues: &[(&str, u64, u64)]) -> Snapshot {
        let mut builder = Snapshot::builder().timestamp_ms(ts_secs * 1000);
        for &(name, published, delivered) in queues {
            builder = builder.queue(name, |q| q.published(published).delivered(delivered));
        }
        builder.build()
    }

    fn engine() -> Engine {
        Engine::new(1, Thresholds::default())
    }

    fn row<'a>(rows: &'a [DisplayRow], name: &str) -> &'a DisplayRow {
        rows.iter().find(|r| r.name == name).unwrap()
    }

    #[test]
    fn test_rates_and_deltas_across_reset() {
        let mut engine = engine();

        let r0 = engine.update(&snap(0, &[("q1", 100, 90)]));
        let r1 = engine.update(&snap(1, &[("q1", 110, 95)]));
        let r2 = engine.update(&snap(2, &[("q1", 0, 0)]));

        assert_eq!(r0[0].pub_rate, None);
        assert_eq!(r1[0].pub_rate, Some(10.0));
        assert_eq!(r2[0].pub_rate, Some(0.0));

        let deltas: Vec<u64> = [&r0, &r1, &r2].iter().map(|r| r[0].pub_delta).collect();
        assert_eq!(deltas, vec![0, 10, 10]);

        assert_eq!(r1[0].del_rate, Some(5.0));
        assert_eq!(r2[0].del_delta, 5);
        assert!(!r1[0].reset);
        assert!(r2[0].reset);
        assert!(engine.reset_detected());
    }

    #[test]
    fn test_delta_keeps_climbing_after_reset() {
        let mut engine = engine();
        engine.update(&snap(0, &[("q1", 100, 0)]));
        engine.update(&snap(1, &[("q1", 110, 0)]));
        engine.update(&snap(2, &[("q1", 0, 0)]));
        let rows = engine.update(&snap(3, &[("q1", 5, 0)]));

        assert_eq!(rows[0].pub_delta, 15);
        assert_eq!(rows[0].pub_rate, Some(5.0));
        assert!(!rows[0].reset);
    }

    #[test]
    fn test_monotonic_sequence_delta_is_exact() {
        let mut engine = engine();
        let series = [7u64, 7, 19, 250, 251, 9000];
        let mut last = Vec::new();
        for (t, &v) in series.iter().enumerate() {
            last = engine.update(&snap(t as u64, &[("q", v, v / 2)]));
        }
        assert_eq!(last[0].pub_delta, 9000 - 7);
        assert_eq!(last[0].del_delta, 4500 - 3);
    }

    #[test]
    fn test_counters_reset_independently() {
        let mut engine = engine();
        engine.update(&snap(0, &[("q", 100, 50)]));
        let rows = engine.update(&snap(1, &[("q", 120, 10)]));

        assert_eq!(rows[0].pub_rate, Some(20.0));
        assert_eq!(rows[0].pub_delta, 20);
        assert_eq!(rows[0].del_rate, Some(0.0));
        assert_eq!(rows[0].del_delta, 0);
        assert!(rows[0].reset);
    }

    #[test]
    fn test_zero_interval_reuses_previous_rate() {
        let mut engine = engine();
        engine.update(&snap(0, &[("q", 0, 0)]));
        engine.update(&snap(2, &[("q", 20, 0)]));
        let rows = engine.update(&snap(2, &[("q", 30, 0)]));

        assert_eq!(rows[0].pub_rate, Some(10.0));
        assert_eq!(rows[0].pub_delta, 30);
    }

    #[test]
    fn test_queue_absent_one_tick_is_retained() {
        let mut engine = engine();
        engine.update(&snap(0, &[("a", 100, 0), ("b", 5, 0)]));
        engine.update(&snap(1, &[("a", 110, 0), ("b", 6, 0)]));

        let rows = engine.update(&snap(2, &[("b", 7, 0)]));
        let a = row(&rows, "a");
        assert!(a.stale);
        assert_eq!(a.pub_delta, 10);

        let rows = engine.update(&snap(3, &[("a", 130, 0), ("b", 8, 0)]));
        let a = row(&rows, "a");
        assert!(!a.stale);
        assert_eq!(a.pub_delta, 30);
        assert_eq!(a.pub_rate, Some(10.0));
    }

    #[test]
    fn test_queue_absent_two_ticks_is_removed() {
        let mut engine = engine();
        engine.update(&snap(0, &[("a", 100, 0), ("b", 5, 0)]));
        engine.update(&snap(1, &[("b", 6, 0)]));
        let rows = engine.update(&snap(2, &[("b", 7, 0)]));

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "b");

        // comes back as a brand new queue
        let rows = engine.update(&snap(3, &[("a", 200, 0), ("b", 8, 0)]));
        let a = row(&rows, "a");
        assert_eq!(a.pub_delta, 0);
        assert_eq!(a.pub_rate, None);
    }

    #[test]
    fn test_rows_sorted_by_name_then_vhost() {
        let snapshot = Snapshot::builder()
            .timestamp_ms(0)
            .queue("zeta", |q| q)
            .queue("alpha", |q| q.vhost("prod"))
            .queue("alpha", |q| q.vhost("dev"))
            .build();

        let rows = engine().update(&snapshot);
        let ids: Vec<(String, String)> =
            rows.iter().map(|r| (r.name.clone(), r.vhost.clone())).collect();
        assert_eq!(
            ids,
            vec![
                ("alpha".to_string(), "dev".to_string()),
                ("alpha".to_string(), "prod".to_string()),
                ("zeta".to_string(), "/".to_string()),
            ]
        );
    }

    #[test]
    fn test_clock_step_back_keeps_counting() {
        let mut engine = engine();
        engine.update(&snap(3600, &[("q", 100, 0)]));
        engine.update(&snap(3601, &[("q", 110, 0)]));

        // wall clock stepped back an hour
        let rows = engine.update(&snap(1, &[("q", 130, 0)]));
        assert_eq!(rows[0].pub_delta, 30);
        assert_eq!(rows[0].pub_rate, Some(10.0));
        assert!(!rows[0].reset);

        let rows = engine.update(&snap(2, &[("q", 135, 0)]));
        assert_eq!(rows[0].pub_delta, 35);
        assert_eq!(rows[0].pub_rate, Some(5.0));
    }

    #[test]
    fn test_health_from_ready_depth() {
        let snapshot = Snapshot::builder()
            .timestamp_ms(0)
            .queue("calm", |q| q.ready(3))
            .queue("busy", |q| q.ready(500))
            .queue("flooded", |q| q.ready(5000))
            .build();

        let rows = engine().update(&snapshot);
        assert_eq!(row(&rows, "calm").health, HealthStatus::Healthy);
        assert_eq!(row(&rows, "busy").health, HealthStatus::Warning);
        assert_eq!(row(&rows, "flooded").health, HealthStatus::Critical);
    }

    #[test]
    fn test_totals() {
        let mut engine = engine();
        engine.update(&snap(0, &[("a", 0, 0), ("b", 100, 100)]));
        engine.update(&snap(1, &[("a", 4, 2), ("b", 110, 101)]));

        let totals = engine.totals();
        assert_eq!(totals.queues, 2);
        assert_eq!(totals.pub_delta, 14);
        assert_eq!(totals.del_delta, 3);
        assert_eq!(totals.pub_rate, 14.0);
        assert_eq!(totals.started_at_ms, engine.session().started_at_ms);
    }
}
