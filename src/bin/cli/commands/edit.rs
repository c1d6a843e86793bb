use anyhow::{Context, Result};

use crate::app::App;
use crate::render::terminal as renderer;
use crate::OutputFormat;

pub async fn add(app: &App, name: &str, format: &OutputFormat, use_color: bool) -> Result<()> {
    let author = app.author()?;

    match app.sync.add_item(name, &author).await? {
        Some(item) => match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&item)?),
            OutputFormat::Plain => println!("Added {}", renderer::render_item(&item, use_color)),
        },
        None => eprintln!("Nothing to add: item name is blank"),
    }

    Ok(())
}

pub async fn toggle(app: &App, id: i64, format: &OutputFormat, use_color: bool) -> Result<()> {
    app.author()?;
    // Toggling needs the current value
    app.sync.load().await?;

    let completed = app.sync.toggle_item(id).await?;
    let item = app
        .sync
        .items()
        .into_iter()
        .find(|i| i.id == id)
        .context("Item disappeared after toggling")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&item)?),
        OutputFormat::Plain => {
            let verb = if completed { "Checked" } else { "Unchecked" };
            println!("{} {}", verb, renderer::render_item(&item, use_color));
        }
    }

    Ok(())
}

pub async fn remove(app: &App, id: i64, format: &OutputFormat) -> Result<()> {
    app.author()?;
    app.sync.remove_item(id).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "removed": id })),
        OutputFormat::Plain => println!("Removed #{}", id),
    }

    Ok(())
}
