use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use super::app_state::{Intent, Mode, TuiState};

pub fn handle_key(state: &mut TuiState, key: KeyEvent) -> Option<Intent> {
    // Clear flash message on any keypress
    state.flash_message = None;

    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        state.quit = true;
        return None;
    }

    match state.mode {
        Mode::Normal => handle_list_key(state, key),
        Mode::Adding => handle_input_key(state, key),
    }
}

fn handle_list_key(state: &mut TuiState, key: KeyEvent) -> Option<Intent> {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => state.quit = true,
        KeyCode::Char('j') | KeyCode::Down => state.move_down(),
        KeyCode::Char('k') | KeyCode::Up => state.move_up(),
        KeyCode::Char('g') | KeyCode::Home => state.go_top(),
        KeyCode::Char('G') | KeyCode::End => state.go_bottom(),
        KeyCode::Char('a') => {
            state.mode = Mode::Adding;
            state.input_text.clear();
        }
        KeyCode::Char(' ') | KeyCode::Enter => {
            return state.selected_item().map(|i| Intent::Toggle(i.id));
        }
        KeyCode::Char('d') | KeyCode::Delete => {
            return state.selected_item().map(|i| Intent::Remove(i.id));
        }
        KeyCode::Char('r') => return Some(Intent::Reload),
        _ => {}
    }
    None
}

fn handle_input_key(state: &mut TuiState, key: KeyEvent) -> Option<Intent> {
    match key.code {
        KeyCode::Esc => {
            state.input_text.clear();
            state.mode = Mode::Normal;
        }
        KeyCode::Enter => {
            state.mode = Mode::Normal;
            let name = std::mem::take(&mut state.input_text);
            return Some(Intent::Add(name));
        }
        KeyCode::Backspace => {
            state.input_text.pop();
        }
        KeyCode::Char(c) => {
            state.input_text.push(c);
        }
        _ => {}
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use shoplist_lib::list::{ListItem, ListState};

    fn press(state: &mut TuiState, code: KeyCode) -> Option<Intent> {
        handle_key(state, KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn state_with_items() -> TuiState {
        let mut state = TuiState::new("a@x.com".to_string());
        state.update_list(ListState {
            items: vec![ListItem {
                id: 7,
                created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                name: "milk".to_string(),
                completed: false,
                added_by: "a@x.com".to_string(),
            }],
            ..ListState::default()
        });
        state
    }

    #[test]
    fn test_add_flow() {
        let mut state = state_with_items();
        assert_eq!(press(&mut state, KeyCode::Char('a')), None);
        assert_eq!(state.mode, Mode::Adding);

        for c in "eggs".chars() {
            press(&mut state, KeyCode::Char(c));
        }
        press(&mut state, KeyCode::Backspace);
        assert_eq!(press(&mut state, KeyCode::Enter), Some(Intent::Add("egg".to_string())));
        assert_eq!(state.mode, Mode::Normal);
        assert!(state.input_text.is_empty());
    }

    #[test]
    fn test_escape_cancels_add() {
        let mut state = state_with_items();
        press(&mut state, KeyCode::Char('a'));
        press(&mut state, KeyCode::Char('x'));
        assert_eq!(press(&mut state, KeyCode::Esc), None);
        assert_eq!(state.mode, Mode::Normal);
        assert!(!state.quit);
    }

    #[test]
    fn test_list_intents() {
        let mut state = state_with_items();
        assert_eq!(press(&mut state, KeyCode::Char(' ')), Some(Intent::Toggle(7)));
        assert_eq!(press(&mut state, KeyCode::Char('d')), Some(Intent::Remove(7)));
        assert_eq!(press(&mut state, KeyCode::Char('r')), Some(Intent::Reload));

        press(&mut state, KeyCode::Char('q'));
        assert!(state.quit);
    }

    #[test]
    fn test_no_intent_on_empty_list() {
        let mut state = TuiState::new("a@x.com".to_string());
        assert_eq!(press(&mut state, KeyCode::Char(' ')), None);
        assert_eq!(press(&mut state, KeyCode::Char('d')), None);
    }
}
