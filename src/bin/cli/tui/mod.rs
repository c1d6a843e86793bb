mod app_state;
mod key_handler;
mod list_widget;
mod status_bar;
mod ui;

use std::io;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::prelude::*;
use tokio::sync::watch;

use shoplist_lib::list::ListState;

use crate::app::App;
use app_state::{Intent, TuiState};

pub async fn run(app: App) -> Result<()> {
    let author = app.author()?;
    let refresher = app.spawn_token_refresh();

    let mut rx = app.sync.subscribe_state();
    let live = app.sync.watch()?;
    // A failed first load shows up in the list title
    let _ = app.sync.load().await;

    let mut state = TuiState::new(author);
    state.update_list(rx.borrow_and_update().clone());

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, &mut state, &app, &mut rx).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    live.stop();
    if let Some(handle) = refresher {
        handle.abort();
    }

    result
}

async fn run_loop<B: Backend>(
    terminal: &mut Terminal<B>,
    state: &mut TuiState,
    app: &App,
    rx: &mut watch::Receiver<ListState>,
) -> Result<()> {
    loop {
        if rx.has_changed().unwrap_or(false) {
            state.update_list(rx.borrow_and_update().clone());
        }

        terminal.draw(|f| ui::draw(f, state))?;

        if state.quit {
            return Ok(());
        }

        // Poll for events with timeout, off the async workers
        if tokio::task::block_in_place(|| event::poll(Duration::from_millis(100)))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(intent) = key_handler::handle_key(state, key) {
                        perform(app, state, intent).await;
                    }
                }
            }
        }
    }
}

async fn perform(app: &App, state: &mut TuiState, intent: Intent) {
    let result = match intent {
        Intent::Add(name) => app
            .sync
            .add_item(&name, &state.user)
            .await
            .map(|added| match added {
                Some(item) => format!("Added {}", item.name),
                None => "Nothing to add".to_string(),
            }),
        Intent::Toggle(id) => app
            .sync
            .toggle_item(id)
            .await
            .map(|done| if done { "Checked" } else { "Unchecked" }.to_string()),
        Intent::Remove(id) => app.sync.remove_item(id).await.map(|_| "Removed".to_string()),
        Intent::Reload => app.sync.load().await.map(|_| "Reloaded".to_string()),
    };

    match result {
        Ok(message) => state.flash(message, false),
        Err(e) => state.flash(e.to_string(), true),
    }
    state.update_list(app.sync.state());
}
