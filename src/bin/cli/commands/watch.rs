use anyhow::Result;

use shoplist_lib::list::{ListState, SyncStatus};

use crate::app::App;
use crate::render::terminal as renderer;
use crate::OutputFormat;

/// Print the list on every refresh until Ctrl-C
pub async fn run(app: &App, format: &OutputFormat, use_color: bool) -> Result<()> {
    app.author()?;
    let refresher = app.spawn_token_refresh();

    let mut rx = app.sync.subscribe_state();
    let live = app.sync.watch()?;
    app.sync.load().await?;

    loop {
        let state = rx.borrow_and_update().clone();
        if is_settled(&state) {
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string(&state)?),
                OutputFormat::Plain => {
                    println!("{}", renderer::render_items(&state.items, use_color));
                    if let Some(status) = renderer::render_status(&state, use_color) {
                        println!("{}", status);
                    }
                    println!();
                }
            }
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    live.stop();
    if let Some(handle) = refresher {
        handle.abort();
    }
    Ok(())
}

/// A refresh publishes `Loading` before its result; only the result is
/// worth printing
fn is_settled(state: &ListState) -> bool {
    state.status != SyncStatus::Loading
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_settled_states_print() {
        let mut state = ListState::default();
        assert!(is_settled(&state));

        state.status = SyncStatus::Loading;
        assert!(!is_settled(&state));

        // An earlier failure is still on display while the next load runs
        state.last_error = Some("Error fetching items".to_string());
        assert!(!is_settled(&state));

        state.status = SyncStatus::Error;
        assert!(is_settled(&state));
    }
}
