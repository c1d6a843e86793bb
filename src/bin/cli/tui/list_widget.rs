use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem as Row, ListState as Selection};

use shoplist_lib::list::SyncStatus;

use super::app_state::TuiState;

pub fn draw(f: &mut Frame, area: Rect, state: &TuiState) {
    let (title, border) = match (&state.list.status, &state.list.last_error) {
        (SyncStatus::Loading, _) => (" Items (loading...) ".to_string(), Color::Yellow),
        (SyncStatus::Error, Some(err)) => (format!(" Items ({}) ", err), Color::Red),
        _ => (" Items ".to_string(), Color::Cyan),
    };

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border));

    if state.list.items.is_empty() {
        let empty = List::new(vec![Row::new("  Nothing here yet. Press a to add an item.")
            .style(Style::default().fg(Color::DarkGray))])
        .block(block);
        f.render_widget(empty, area);
        return;
    }

    let rows: Vec<Row> = state
        .list
        .items
        .iter()
        .map(|item| {
            let (check, style) = if item.completed {
                (
                    "\u{2611} ",
                    Style::default()
                        .fg(Color::DarkGray)
                        .add_modifier(Modifier::CROSSED_OUT),
                )
            } else {
                ("\u{2610} ", Style::default().fg(Color::White))
            };

            Row::new(Line::from(vec![
                Span::styled(format!("{}{}", check, item.name), style),
                Span::styled(
                    format!("  {}", item.added_by),
                    Style::default().fg(Color::DarkGray),
                ),
            ]))
        })
        .collect();

    let list = List::new(rows)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    let mut selection = Selection::default();
    selection.select(Some(state.selected));

    f.render_stateful_widget(list, area, &mut selection);
}
