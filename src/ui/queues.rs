//! Queue table rendering.
//!
//! One row per queue: depths colored by health, rates, session deltas and a
//! ready-depth trend. Stale rows are dimmed and marked `·`; rows whose
//! counters were rebased this tick are marked `↺`.

use ratatui::{
    layout::{Constraint, Rect},
    style::Style,
    widgets::{Block, Borders, Cell, Row, Table, TableState},
    Frame,
};

use crate::app::App;
use crate::data::DisplayRow;
use crate::ui::common::{format_count, format_rate};

/// Sparkline characters (8 levels of height).
const SPARKLINE_CHARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

const TREND_WIDTH: usize = 10;

/// Render the queue table.
pub fn render(frame: &mut Frame, app: &App, area: Rect) {
    let visible = app.visible_rows();

    let header = Row::new(vec![
        Cell::from("Queue"),
        Cell::from("VHost"),
        Cell::from("Ready"),
        Cell::from("Unacked"),
        Cell::from("Cons"),
        Cell::from("Pub/s"),
        Cell::from("Del/s"),
        Cell::from("PubΔ"),
        Cell::from("DelΔ"),
        Cell::from("Trend"),
    ])
    .height(1)
    .style(app.theme.header);

    let rows: Vec<Row> = visible.iter().map(|row| table_row(app, row)).collect();

    let widths = [
        Constraint::Fill(3), // Queue
        Constraint::Fill(1), // VHost
        Constraint::Fill(1), // Ready
        Constraint::Fill(1), // Unacked
        Constraint::Min(4), // Cons
        Constraint::Fill(1), // Pub/s
        Constraint::Fill(1), // Del/s
        Constraint::Fill(1), // PubΔ
        Constraint::Fill(1), // DelΔ
        Constraint::Min(TREND_WIDTH as u16), // Trend
    ];

    let selected = app.selected_index.min(visible.len().saturating_sub(1));

    let filter_info = if app.filter_active {
        format!(" /{}_", app.filter_text)
    } else if !app.filter_text.is_empty() {
        format!(" /{}/ [c:clear]", app.filter_text)
    } else {
        String::new()
    };

    let position_info = if !visible.is_empty() {
        format!(" [{}/{}]", selected + 1, visible.len())
    } else {
        String::new()
    };

    let title = format!(
        " Queues ({}/{}){}{} ",
        visible.len(),
        app.rows.len(),
        filter_info,
        position_info
    );

    let table = Table::new(rows, widths)
        .header(header)
        .block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_type(app.theme.border_type)
                .border_style(Style::default().fg(app.theme.border)),
        )
        .row_highlight_style(app.theme.selected)
        .highlight_symbol("▶ ");

    let mut state = TableState::default();
    if !visible.is_empty() {
        state.select(Some(selected));
    }

    frame.render_stateful_widget(table, area, &mut state);
}

fn table_row<'a>(app: &App, row: &DisplayRow) -> Row<'a> {
    let marker = if row.stale {
        "·"
    } else if row.reset {
        "↺"
    } else {
        " "
    };

    let ready_style = app.theme.ready_style(row.health, row.stale);

    let trend = render_sparkline(&app.history.ready_sparkline(&row.id(), TREND_WIDTH));

    let cells = vec![
        Cell::from(format!("{}{}", marker, row.name)),
        Cell::from(row.vhost.clone()),
        Cell::from(format_count(row.ready)).style(ready_style),
        Cell::from(format_count(row.unacked)),
        Cell::from(row.consumers.to_string()),
        Cell::from(format_rate(row.pub_rate)),
        Cell::from(format_rate(row.del_rate)),
        Cell::from(format_count(row.pub_delta)),
        Cell::from(format_count(row.del_delta)),
        Cell::from(trend),
    ];

    let table_row = Row::new(cells);
    if row.stale {
        table_row.style(app.theme.stale)
    } else {
        table_row
    }
}

/// Render sparkline data as a string of Unicode block characters.
fn render_sparkline(data: &[u8]) -> String {
    data.iter()
        .map(|&v| SPARKLINE_CHARS[(v as usize).min(7)])
        .collect()
}
