use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use super::app_state::TuiState;
use super::{list_widget, status_bar};

pub fn draw(f: &mut Frame, state: &TuiState) {
    let size = f.area();

    // Header, list, status bar
    let outer = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(size);

    let open = state.list.items.iter().filter(|i| !i.completed).count();
    let header = Paragraph::new(format!(
        " Shopping list | {} | {} of {} to get",
        state.user,
        open,
        state.list.items.len()
    ))
    .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD));
    f.render_widget(header, outer[0]);

    list_widget::draw(f, outer[1], state);
    status_bar::draw(f, outer[2], state);
}
