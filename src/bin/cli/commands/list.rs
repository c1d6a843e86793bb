use anyhow::Result;

use crate::app::App;
use crate::render::terminal as renderer;
use crate::OutputFormat;

pub async fn run(app: &App, format: &OutputFormat, use_color: bool) -> Result<()> {
    app.author()?;
    app.sync.load().await?;
    print_items(app, format, use_color)
}

pub fn print_items(app: &App, format: &OutputFormat, use_color: bool) -> Result<()> {
    let items = app.sync.items();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&items)?),
        OutputFormat::Plain => println!("{}", renderer::render_items(&items, use_color)),
    }

    Ok(())
}
