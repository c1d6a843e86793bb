use std::io::{BufRead, Write};

use anyhow::{Context, Result};

use crate::app::App;
use crate::OutputFormat;

pub async fn login(
    app: &App,
    email: Option<&str>,
    password: Option<String>,
    format: &OutputFormat,
) -> Result<()> {
    let auth = app.auth()?;

    let user = match email {
        Some(email) => {
            let password = match password {
                Some(p) => p,
                None => prompt("Password: ")?,
            };
            auth.sign_in_with_password(email, &password)
                .await
                .context("Sign-in failed")?
        }
        None => {
            let provider = app.config.auth.provider.clone();
            auth.sign_in(&provider, app.config.auth.callback_port, |url| {
                eprintln!("Opening your browser to sign in. If nothing happens, visit:\n\n  {}\n", url);
                open_browser(url);
            })
            .await
            .context("Sign-in failed")?
        }
    };
    app.apply_session();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&user)?),
        OutputFormat::Plain => println!("Signed in as {}", user.label()),
    }

    Ok(())
}

pub async fn logout(app: &App) -> Result<()> {
    app.auth()?.sign_out().await.context("Sign-out failed")?;
    app.apply_session();
    println!("Signed out");
    Ok(())
}

pub async fn whoami(app: &App, format: &OutputFormat) -> Result<()> {
    let auth = app.auth()?;
    let user = match auth.current_user() {
        Some(_) => Some(auth.verify().await.context("Failed to check session")?),
        None => None,
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&user)?),
        OutputFormat::Plain => match user {
            Some(user) => println!("{} ({})", user.label(), user.id),
            None => println!("Not signed in"),
        },
    }

    Ok(())
}

/// Read one line from stdin after printing `label` to stderr
pub fn prompt(label: &str) -> Result<String> {
    eprint!("{}", label);
    std::io::stderr().flush()?;

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn open_browser(url: &str) {
    let opener = if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(target_os = "windows") {
        "explorer"
    } else {
        "xdg-open"
    };

    if let Err(e) = std::process::Command::new(opener).arg(url).spawn() {
        log::debug!("Could not launch {}: {}", opener, e);
    }
}
