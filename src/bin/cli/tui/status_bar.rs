use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use super::app_state::{Mode, TuiState};

pub fn draw(f: &mut Frame, area: Rect, state: &TuiState) {
    // Show flash message if present
    if let Some(ref msg) = state.flash_message {
        let bg = if state.flash_is_error { Color::Red } else { Color::Green };
        let flash = Paragraph::new(format!(" {}", msg))
            .style(Style::default().bg(bg).fg(Color::Black));
        f.render_widget(flash, area);
        return;
    }

    match state.mode {
        Mode::Adding => {
            let text = format!(" Add item: {}\u{2588}", state.input_text);
            let prompt = Paragraph::new(text)
                .style(Style::default().bg(Color::Blue).fg(Color::White));
            f.render_widget(prompt, area);
        }
        Mode::Normal => {
            let hints = " a: add  space: toggle  d: delete  r: reload  j/k: navigate  q: quit ";
            let status = Paragraph::new(hints)
                .style(Style::default().bg(Color::DarkGray).fg(Color::White));
            f.render_widget(status, area);
        }
    }
}
