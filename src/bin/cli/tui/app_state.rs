use shoplist_lib::list::{ListItem, ListState};

#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Normal,
    Adding,
}

/// Something the key handler wants done against the list
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Add(String),
    Toggle(i64),
    Remove(i64),
    Reload,
}

pub struct TuiState {
    pub mode: Mode,
    /// Latest synchronizer snapshot
    pub list: ListState,
    pub selected: usize,
    /// Signed-in user, recorded as the author of new items
    pub user: String,

    pub input_text: String,
    pub flash_message: Option<String>,
    pub flash_is_error: bool,

    pub quit: bool,
}

impl TuiState {
    pub fn new(user: String) -> Self {
        Self {
            mode: Mode::Normal,
            list: ListState::default(),
            selected: 0,
            user,
            input_text: String::new(),
            flash_message: None,
            flash_is_error: false,
            quit: false,
        }
    }

    /// Swap in a new snapshot, keeping the cursor on the same item when it
    /// is still there
    pub fn update_list(&mut self, list: ListState) {
        let selected_id = self.selected_item().map(|i| i.id);
        self.list = list;

        if let Some(index) = selected_id.and_then(|id| self.list.items.iter().position(|i| i.id == id)) {
            self.selected = index;
        }
        self.selected = self.selected.min(self.list.items.len().saturating_sub(1));
    }

    pub fn selected_item(&self) -> Option<&ListItem> {
        self.list.items.get(self.selected)
    }

    pub fn flash(&mut self, message: String, is_error: bool) {
        self.flash_message = Some(message);
        self.flash_is_error = is_error;
    }

    pub fn move_down(&mut self) {
        if self.selected + 1 < self.list.items.len() {
            self.selected += 1;
        }
    }

    pub fn move_up(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn go_top(&mut self) {
        self.selected = 0;
    }

    pub fn go_bottom(&mut self) {
        self.selected = self.list.items.len().saturating_sub(1);
    }
}
