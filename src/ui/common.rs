//! Common UI components.
//!
//! This module contains the header bar, stale banner, status bar, and help overlay.

use std::time::Duration;

use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

use mqtop_types::current_timestamp_ms;

use crate::app::App;
use crate::data::duration::{format_duration, format_uptime};
use crate::data::HealthStatus;

/// Render the header bar.
///
/// Displays: provider, tunnel badge, session uptime, totals and the worst health.
pub fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let worst = app
        .rows
        .iter()
        .filter(|r| !r.stale)
        .map(|r| r.health)
        .max()
        .unwrap_or(HealthStatus::Healthy);

    let uptime = Duration::from_millis(
        current_timestamp_ms().saturating_sub(app.started_at_ms()),
    );
    let totals = &app.totals;

    let line = Line::from(vec![
        Span::styled(" ● ", app.theme.status_style(worst)),
        Span::styled("MQTOP ", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("│ "),
        Span::styled(
            app.provider.clone(),
            Style::default().fg(app.theme.highlight),
        ),
        Span::raw(" │ "),
        Span::styled(
            app.tunnel_badge(),
            app.theme
                .tunnel_style(app.tunnel.as_ref().map(|t| &t.state), app.is_direct()),
        ),
        Span::raw(" │ up "),
        Span::raw(format_uptime(uptime)),
        Span::raw(" │ "),
        Span::styled(
            totals.queues.to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw(" queues │ "),
        Span::raw(format!(
            "ready {} │ pub {}/s Δ{} │ del {}/s Δ{}",
            format_count(totals.ready),
            format_rate(Some(totals.pub_rate)),
            format_count(totals.pub_delta),
            format_rate(Some(totals.del_rate)),
            format_count(totals.del_delta),
        )),
    ]);

    frame.render_widget(Paragraph::new(line), area);
}

/// One-line banner explaining why the table is stale. Empty when fresh.
pub fn render_banner(frame: &mut Frame, app: &App, area: Rect) {
    let Some(reason) = &app.stale else {
        return;
    };

    let style = app.theme.banner_style(reason);

    let mut text = format!(" {} ", reason.banner());
    if let Some(last) = app.last_update {
        text.push_str(&format!(
            "│ last data {} ago",
            format_duration(Duration::from_secs(last.elapsed().as_secs()))
        ));
    }

    frame.render_widget(Paragraph::new(text).style(style), area);
}

/// Format a count for display (e.g., 1234 -> "1.2K", 1234567 -> "1.2M").
pub fn format_count(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

/// Format a per-second rate; `-` until two samples exist.
pub fn format_rate(rate: Option<f64>) -> String {
    match rate {
        None => "-".to_string(),
        Some(r) if r >= 1_000.0 => format!("{:.1}K", r / 1_000.0),
        Some(r) if r >= 10.0 => format!("{:.0}", r),
        Some(r) => format!("{:.1}", r),
    }
}

/// Render the status bar at the bottom.
///
/// Shows: source, time since last update, refresh interval, available controls.
/// Temporary status messages take precedence.
pub fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    if let Some(msg) = app.get_status_message() {
        let paragraph =
            Paragraph::new(format!(" {} ", msg)).style(Style::default().fg(app.theme.highlight));
        frame.render_widget(paragraph, area);
        return;
    }

    let controls = if app.filter_active {
        "Type to search | Enter:apply Esc:cancel"
    } else {
        "/:search r:refresh R:restart +/-:interval e:export ?:help q:quit"
    };

    let updated = match app.last_update {
        Some(at) => format!("Updated {:.1}s ago", at.elapsed().as_secs_f64()),
        None => "Waiting for data".to_string(),
    };

    let status = format!(
        " {} | {} | every {} | {}",
        app.source,
        updated,
        format_duration(app.refresh),
        controls,
    );

    let paragraph = Paragraph::new(status).style(Style::default().add_modifier(Modifier::DIM));
    frame.render_widget(paragraph, area);
}

/// Render the help overlay with keyboard shortcuts.
///
/// Displayed as a centered modal on top of the table.
pub fn render_help(frame: &mut Frame, app: &App, area: Rect) {
    let section = |title: &'static str| {
        Line::from(vec![Span::styled(
            title,
            Style::default().add_modifier(Modifier::BOLD),
        )])
    };

    let help_text = vec![
        Line::from(vec![Span::styled("Keyboard Shortcuts", app.theme.header)]),
        Line::from(""),
        section(" Navigation"),
        Line::from("  ↑/↓ j/k     Navigate list"),
        Line::from("  PgUp/PgDn   Jump 10 items"),
        Line::from("  Home/End    Jump to first/last"),
        Line::from(""),
        section(" Filter"),
        Line::from("  /           Start filter/search"),
        Line::from("  c           Clear filter"),
        Line::from(""),
        section(" Session"),
        Line::from("  r           Refresh now"),
        Line::from("  R           Restart tunnel"),
        Line::from("  +           Slower refresh"),
        Line::from("  -           Faster refresh"),
        Line::from("  e           Export to JSON"),
        Line::from("  q/Esc       Quit"),
        Line::from(""),
        section(" Markers"),
        Line::from("  ·           Stale row"),
        Line::from("  ↺           Counter reset"),
        Line::from(""),
        Line::from(vec![Span::styled(
            "Press any key to close",
            Style::default().add_modifier(Modifier::DIM),
        )]),
    ];

    let block = Block::default()
        .title(" Help ")
        .borders(Borders::ALL)
        .border_type(app.theme.border_type)
        .border_style(Style::default().fg(app.theme.highlight));

    let paragraph = Paragraph::new(help_text).block(block);

    let help_width = 42u16.min(area.width.saturating_sub(4));
    let help_height = 27u16.min(area.height.saturating_sub(2));
    let x = area.x + (area.width.saturating_sub(help_width)) / 2;
    let y = area.y + (area.height.saturating_sub(help_height)) / 2;
    let help_area = Rect::new(x, y, help_width, help_height);

    frame.render_widget(Clear, help_area);
    frame.render_widget(paragraph, help_area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_234), "1.2K");
        assert_eq!(format_count(2_500_000), "2.5M");
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(None), "-");
        assert_eq!(format_rate(Some(0.0)), "0.0");
        assert_eq!(format_rate(Some(2.345)), "2.3");
        assert_eq!(format_rate(Some(42.4)), "42");
        assert_eq!(format_rate(Some(1_500.0)), "1.5K");
    }
}
