use shoplist_lib::list::{ListItem, ListState, SyncStatus};

/// ANSI color codes
#[allow(dead_code)]
pub struct Color;

#[allow(dead_code)]
impl Color {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const STRIKETHROUGH: &str = "\x1b[9m";
    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GRAY: &str = "\x1b[90m";
}

/// One line per item: `[x] name  #id  by someone`
pub fn render_item(item: &ListItem, use_color: bool) -> String {
    let check = if item.completed { "[x]" } else { "[ ]" };

    if !use_color {
        return format!("{} {}  #{}  by {}", check, item.name, item.id, author(item));
    }

    let name = if item.completed {
        format!("{}{}{}{}", Color::DIM, Color::STRIKETHROUGH, item.name, Color::RESET)
    } else {
        format!("{}{}{}", Color::BOLD, item.name, Color::RESET)
    };
    let check = if item.completed {
        format!("{}{}{}", Color::GREEN, check, Color::RESET)
    } else {
        check.to_string()
    };

    format!(
        "{} {}  {}#{}  by {}{}",
        check,
        name,
        Color::GRAY,
        item.id,
        author(item),
        Color::RESET
    )
}

pub fn render_items(items: &[ListItem], use_color: bool) -> String {
    if items.is_empty() {
        return "(the list is empty)".to_string();
    }

    let open = items.iter().filter(|i| !i.completed).count();
    let mut lines: Vec<String> = items.iter().map(|i| render_item(i, use_color)).collect();
    lines.push(String::new());
    lines.push(format!("{} items, {} still to get", items.len(), open));
    lines.join("\n")
}

/// Status line shown under the list while watching
pub fn render_status(state: &ListState, use_color: bool) -> Option<String> {
    let message = match (&state.status, &state.last_error) {
        (_, Some(err)) => format!("error: {}", err),
        (SyncStatus::Loading, None) => "loading...".to_string(),
        _ => return None,
    };

    if use_color {
        let color = if state.last_error.is_some() { Color::RED } else { Color::YELLOW };
        Some(format!("{}{}{}", color, message, Color::RESET))
    } else {
        Some(message)
    }
}

fn author(item: &ListItem) -> &str {
    if item.added_by.is_empty() {
        "unknown"
    } else {
        &item.added_by
    }
}
