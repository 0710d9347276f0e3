//! Palette and the styles derived from queue and tunnel state.
//!
//! Light or dark is picked from the terminal background at startup.

use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::block::BorderType;

use crate::app::StaleReason;
use crate::data::HealthStatus;
use crate::tunnel::TunnelState;

/// Colors for one terminal background.
#[derive(Debug, Clone)]
pub struct Theme {
    /// Provider name, status messages, help border.
    pub highlight: Color,
    pub warning: Color,
    pub critical: Color,
    /// Running tunnel.
    pub healthy: Color,
    pub border: Color,
    pub header: Style,
    pub selected: Style,
    /// Queues missing from the last successful poll.
    pub stale: Style,
    pub border_type: BorderType,
}

impl Theme {
    pub fn dark() -> Self {
        Self {
            highlight: Color::Cyan,
            warning: Color::Yellow,
            critical: Color::Red,
            healthy: Color::Green,
            border: Color::Gray,
            header: Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            selected: Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD),
            stale: Style::default().fg(Color::DarkGray).add_modifier(Modifier::DIM),
            border_type: BorderType::Rounded,
        }
    }

    pub fn light() -> Self {
        Self {
            highlight: Color::Blue,
            warning: Color::Yellow,
            critical: Color::Red,
            healthy: Color::Green,
            border: Color::DarkGray,
            header: Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD),
            selected: Style::default().bg(Color::LightBlue).add_modifier(Modifier::BOLD),
            stale: Style::default().fg(Color::Gray).add_modifier(Modifier::DIM),
            border_type: BorderType::Plain,
        }
    }

    /// Light palette on a bright background, dark otherwise (including
    /// terminals that do not answer the query).
    pub fn auto_detect() -> Self {
        match terminal_light::luma() {
            Ok(luma) if luma > 0.5 => Self::light(),
            _ => Self::dark(),
        }
    }

    fn alert(&self) -> Style {
        Style::default().fg(self.critical).add_modifier(Modifier::BOLD)
    }

    /// Healthy backlogs keep the terminal's default color.
    pub fn status_style(&self, status: HealthStatus) -> Style {
        match status {
            HealthStatus::Healthy => Style::default(),
            HealthStatus::Warning => Style::default().fg(self.warning),
            HealthStatus::Critical => self.alert(),
        }
    }

    /// Style of the `ready` cell; stale rows are not judged.
    pub fn ready_style(&self, status: HealthStatus, stale: bool) -> Style {
        if stale {
            Style::default()
        } else {
            self.status_style(status)
        }
    }

    /// Header badge. `state` is `None` before the first report, or always
    /// for a direct connection.
    pub fn tunnel_style(&self, state: Option<&TunnelState>, direct: bool) -> Style {
        match state {
            Some(TunnelState::Running) => Style::default().fg(self.healthy),
            Some(TunnelState::Failed(_)) => self.alert(),
            Some(_) => Style::default().fg(self.warning),
            None if direct => Style::default().add_modifier(Modifier::DIM),
            None => Style::default().fg(self.warning),
        }
    }

    /// A counter rebase is informational; lost connectivity is not.
    pub fn banner_style(&self, reason: &StaleReason) -> Style {
        match reason {
            StaleReason::BrokerRestart => Style::default().fg(self.warning),
            StaleReason::TunnelDown | StaleReason::BrokerUnreachable(_) => self.alert(),
        }
    }
}
