//! Application state and interaction logic.
//!
//! `App` is the single render owner: it holds the [`Engine`] and everything
//! shown on screen, consumes [`SessionEvent`]s from the background tasks,
//! and queues [`AppAction`]s for the runtime to forward to them. It never
//! performs I/O on its own apart from the JSON export.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{info, warn};

use crate::data::{DisplayRow, Engine, History, SessionTotals, Thresholds};
use crate::session::SessionEvent;
use crate::source::PollError;
use crate::tunnel::TunnelStatus;
use crate::ui::Theme;

/// Bounds for `+`/`-` refresh changes.
pub const MIN_REFRESH: Duration = Duration::from_millis(250);
pub const MAX_REFRESH: Duration = Duration::from_secs(60);

/// Requests from the UI to the background tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    /// Poll now instead of waiting for the timer.
    ForceRefresh,
    SetRefresh(Duration),
    /// User asked for a tunnel restart.
    RestartTunnel,
    /// Too many consecutive poll failures; presume the tunnel of this
    /// generation is broken.
    RecoverTunnel(u64),
}

/// Why the table is not showing fresh data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    TunnelDown,
    BrokerUnreachable(String),
    /// Not stale as such: counters were rebased this tick.
    BrokerRestart,
}

impl StaleReason {
    pub fn banner(&self) -> String {
        match self {
            StaleReason::TunnelDown => "tunnel down".to_string(),
            StaleReason::BrokerUnreachable(msg) => format!("broker unreachable: {}", msg),
            StaleReason::BrokerRestart => "broker restart detected".to_string(),
        }
    }
}

/// Session knobs the app needs from configuration.
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub provider: String,
    pub source: String,
    pub refresh: Duration,
    pub grace_ticks: u32,
    pub failure_threshold: u32,
    pub thresholds: Thresholds,
    /// `k8s` provider: there is a tunnel to supervise.
    pub tunnelled: bool,
}

/// Main application state.
pub struct App {
    pub running: bool,
    pub show_help: bool,

    pub provider: String,
    pub source: String,

    engine: Engine,
    pub rows: Vec<DisplayRow>,
    pub totals: SessionTotals,
    pub history: History,
    pub thresholds: Thresholds,
    pub last_update: Option<Instant>,
    pub stale: Option<StaleReason>,
    consecutive_failures: u32,
    failure_threshold: u32,

    /// `None` for direct providers.
    pub tunnel: Option<TunnelStatus>,
    tunnelled: bool,

    pub refresh: Duration,

    // Navigation state
    pub selected_index: usize,

    // Search/filter
    pub filter_text: String,
    pub filter_active: bool,

    // UI
    pub theme: Theme,

    // Status message (temporary feedback)
    pub status_message: Option<(String, Instant)>,

    /// Set when a fatal poll error ends the session.
    pub fatal: Option<String>,

    actions: Vec<AppAction>,
}

impl App {
    pub fn new(options: AppOptions, theme: Theme) -> Self {
        Self {
            running: true,
            show_help: false,
            provider: options.provider,
            source: options.source,
            engine: Engine::new(options.grace_ticks, options.thresholds),
            rows: Vec::new(),
            totals: SessionTotals::default(),
            history: History::new(),
            thresholds: options.thresholds,
            last_update: None,
            stale: None,
            consecutive_failures: 0,
            failure_threshold: options.failure_threshold.max(1),
            tunnel: None,
            tunnelled: options.tunnelled,
            refresh: options.refresh,
            selected_index: 0,
            filter_text: String::new(),
            filter_active: false,
            theme,
            status_message: None,
            fatal: None,
            actions: Vec::new(),
        }
    }

    /// Session start (ms since epoch).
    pub fn started_at_ms(&self) -> u64 {
        self.engine.session().started_at_ms
    }

    /// No tunnel is supervised; the broker is reached as configured.
    pub fn is_direct(&self) -> bool {
        !self.tunnelled
    }

    /// Whether polling makes sense right now.
    pub fn poller_enabled(&self) -> bool {
        if !self.tunnelled {
            return true;
        }
        self.tunnel.as_ref().is_some_and(|t| t.state.is_running())
    }

    pub fn tunnel_badge(&self) -> String {
        match &self.tunnel {
            Some(status) => status.badge(),
            None if self.tunnelled => "tunnel: stopped".to_string(),
            None => "direct".to_string(),
        }
    }

    /// Drain actions queued since the last call.
    pub fn take_actions(&mut self) -> Vec<AppAction> {
        std::mem::take(&mut self.actions)
    }

    /// Set a temporary status message that will be shown for a few seconds.
    pub fn set_status_message(&mut self, message: String) {
        self.status_message = Some((message, Instant::now()));
    }

    /// Get the current status message if it hasn't expired (3 seconds).
    pub fn get_status_message(&self) -> Option<&str> {
        if let Some((msg, time)) = &self.status_message {
            if time.elapsed() < Duration::from_secs(3) {
                return Some(msg);
            }
        }
        None
    }

    /// Apply one message from a background task.
    pub fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Poll(Ok(snapshot)) => {
                self.rows = self.engine.update(&snapshot);
                self.totals = self.engine.totals();
                self.history.record(&self.rows);
                self.last_update = Some(Instant::now());
                self.consecutive_failures = 0;
                self.stale = self
                    .engine
                    .reset_detected()
                    .then_some(StaleReason::BrokerRestart);
                self.clamp_selection();
            }
            SessionEvent::Poll(Err(PollError::Transient(msg))) => {
                if self.tunnelled && self.running_generation().is_none() {
                    // fetch was in flight when the tunnel went down
                    self.mark_stale(StaleReason::TunnelDown);
                    return;
                }
                self.mark_stale(StaleReason::BrokerUnreachable(msg));
                let Some(generation) = self.running_generation() else {
                    return;
                };
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.failure_threshold {
                    self.consecutive_failures = 0;
                    warn!(
                        threshold = self.failure_threshold,
                        generation, "repeated poll failures, recovering tunnel"
                    );
                    self.actions.push(AppAction::RecoverTunnel(generation));
                }
            }
            SessionEvent::Poll(Err(PollError::Fatal(err))) => {
                self.fatal = Some(err.to_string());
                self.running = false;
            }
            SessionEvent::Tunnel(status) => {
                let running = status.state.is_running();
                self.tunnel = Some(status);
                if running {
                    if self.stale == Some(StaleReason::TunnelDown) {
                        self.stale = None;
                        self.actions.push(AppAction::ForceRefresh);
                    }
                } else {
                    self.consecutive_failures = 0;
                    self.mark_stale(StaleReason::TunnelDown);
                }
            }
            SessionEvent::Terminate(signal) => {
                info!(signal, "terminating");
                self.quit();
            }
        }
    }

    /// Generation of the tunnel process, while it is `Running`.
    fn running_generation(&self) -> Option<u64> {
        self.tunnel
            .as_ref()
            .filter(|t| t.state.is_running())
            .map(|t| t.generation)
    }

    fn mark_stale(&mut self, reason: StaleReason) {
        for row in &mut self.rows {
            row.stale = true;
            row.reset = false;
        }
        self.stale = Some(reason);
    }

    /// Rows left after applying the filter, in display order.
    pub fn visible_rows(&self) -> Vec<&DisplayRow> {
        self.rows
            .iter()
            .filter(|r| self.matches_filter(&r.name) || self.matches_filter(&r.vhost))
            .collect()
    }

    fn clamp_selection(&mut self) {
        let count = self.visible_rows().len();
        if self.selected_index >= count {
            self.selected_index = count.saturating_sub(1);
        }
    }

    /// Move selection down by n items.
    pub fn select_next_n(&mut self, n: usize) {
        let max = self.visible_rows().len().saturating_sub(1);
        self.selected_index = (self.selected_index + n).min(max);
    }

    /// Move selection up by n items.
    pub fn select_prev_n(&mut self, n: usize) {
        self.selected_index = self.selected_index.saturating_sub(n);
    }

    pub fn select_next(&mut self) {
        self.select_next_n(1);
    }

    pub fn select_prev(&mut self) {
        self.select_prev_n(1);
    }

    pub fn select_first(&mut self) {
        self.selected_index = 0;
    }

    pub fn select_last(&mut self) {
        self.selected_index = self.visible_rows().len().saturating_sub(1);
    }

    /// Double the refresh interval (bounded).
    pub fn slower(&mut self) {
        self.set_refresh((self.refresh * 2).min(MAX_REFRESH));
    }

    /// Halve the refresh interval (bounded).
    pub fn faster(&mut self) {
        self.set_refresh((self.refresh / 2).max(MIN_REFRESH));
    }

    fn set_refresh(&mut self, refresh: Duration) {
        if refresh != self.refresh {
            self.refresh = refresh;
            self.actions.push(AppAction::SetRefresh(refresh));
        }
        self.set_status_message(format!(
            "Refresh every {}",
            crate::data::duration::format_duration(self.refresh)
        ));
    }

    pub fn refresh_now(&mut self) {
        self.actions.push(AppAction::ForceRefresh);
    }

    pub fn restart_tunnel(&mut self) {
        if self.tunnelled {
            self.actions.push(AppAction::RestartTunnel);
            self.set_status_message("Restarting tunnel...".to_string());
        } else {
            self.set_status_message("Direct provider: no tunnel to restart".to_string());
        }
    }

    /// Toggle the help overlay.
    pub fn toggle_help(&mut self) {
        self.show_help = !self.show_help;
    }

    /// Enter filter input mode (starts capturing keystrokes for search).
    pub fn start_filter(&mut self) {
        self.filter_active = true;
    }

    /// Exit filter input mode without clearing the filter text.
    pub fn cancel_filter(&mut self) {
        self.filter_active = false;
    }

    /// Clear the filter text and exit filter mode.
    pub fn clear_filter(&mut self) {
        self.filter_text.clear();
        self.filter_active = false;
    }

    pub fn filter_push(&mut self, c: char) {
        self.filter_text.push(c);
        self.selected_index = 0;
    }

    pub fn filter_pop(&mut self) {
        self.filter_text.pop();
    }

    /// Case-insensitive substring match against the filter.
    pub fn matches_filter(&self, name: &str) -> bool {
        if self.filter_text.is_empty() {
            return true;
        }
        name.to_lowercase().contains(&self.filter_text.to_lowercase())
    }

    /// Signal the application to quit.
    pub fn quit(&mut self) {
        self.running = false;
    }

    /// Export rows, tunnel status and session totals to a file.
    pub fn export_state(&self, path: &Path) -> Result<()> {
        if self.rows.is_empty() {
            anyhow::bail!("No data to export");
        }

        let tunnel = match &self.tunnel {
            Some(status) => serde_json::json!({
                "state": status.state.label(),
                "badge": status.badge(),
                "pid": status.pid,
                "local_port": status.local_port,
                "restarts": status.restarts,
                "last_check": status.last_check.map(|c| serde_json::json!({
                    "at_ms": c.at_ms,
                    "process_alive": c.process_alive,
                    "port_open": c.port_open,
                })),
            }),
            None => serde_json::json!({ "state": self.tunnel_badge() }),
        };

        let export = serde_json::json!({
            "provider": self.provider,
            "source": self.source,
            "stale": self.stale.as_ref().map(|s| s.banner()),
            "totals": self.totals,
            "tunnel": tunnel,
            "queues": self.rows,
        });

        let json = serde_json::to_string_pretty(&export)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
