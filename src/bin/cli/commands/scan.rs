use std::path::Path;

use anyhow::{bail, Context, Result};

use shoplist_lib::ingredients::IngredientSelection;

use crate::app::App;
use crate::commands::auth::prompt;
use crate::commands::list::print_items;
use crate::OutputFormat;

pub async fn run(
    app: &App,
    image: &Path,
    pick: &[usize],
    yes: bool,
    format: &OutputFormat,
    use_color: bool,
) -> Result<()> {
    let author = app.author()?;
    let bytes = std::fs::read(image)
        .with_context(|| format!("Failed to read {}", image.display()))?;

    let client = app.ingredients()?;
    let found = client.extract(&bytes).await.context("Failed to extract ingredients")?;

    let mut selection = IngredientSelection::new(found);
    if selection.is_empty() {
        eprintln!("No ingredients found in {}", image.display());
        return Ok(());
    }

    if !pick.is_empty() {
        let indices = to_indices(pick, selection.len())?;
        selection.pick_only(&indices);
    }

    for (i, (name, picked)) in selection.iter().enumerate() {
        eprintln!("  {} {:>2}. {}", if picked { "[x]" } else { "[ ]" }, i + 1, name);
    }

    if !yes {
        if !crate::stdin_is_tty() {
            bail!("Refusing to add without confirmation; pass --yes");
        }
        let answer = prompt(&format!("Add {} items to the list? [y/N] ", selection.selected().len()))?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            eprintln!("Cancelled");
            return Ok(());
        }
    }

    let rows = selection.into_rows(&author)?;
    let count = rows.len();
    client
        .add_items(&rows, app.access_token().as_deref())
        .await
        .context("Failed to add ingredients")?;

    app.sync.load().await?;
    if let OutputFormat::Plain = format {
        println!("Added {} items\n", count);
    }
    print_items(app, format, use_color)
}

/// 1-based positions from the command line to indices
fn to_indices(pick: &[usize], len: usize) -> Result<Vec<usize>> {
    pick.iter()
        .map(|&p| {
            if p == 0 || p > len {
                bail!("--pick {} is out of range (1-{})", p, len);
            }
            Ok(p - 1)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_indices() {
        assert_eq!(to_indices(&[1, 3], 3).unwrap(), vec![0, 2]);
        assert!(to_indices(&[0], 3).is_err());
        assert!(to_indices(&[4], 3).is_err());
    }
}
