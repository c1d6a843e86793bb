mod app;
mod commands;
mod render;
#[cfg(feature = "tui")]
mod tui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "shoplist", about = "Shared grocery list CLI and TUI", version)]
struct Cli {
    /// Config file (default: ~/.config/shoplist/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use a throwaway in-memory list instead of the server
    #[arg(long, global = true)]
    offline: bool,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in (browser OAuth, or email and password)
    Login {
        #[arg(long)]
        email: Option<String>,
        /// Prompted on stdin when omitted
        #[arg(long, requires = "email")]
        password: Option<String>,
    },

    /// Sign out and forget the stored session
    Logout,

    /// Show the signed-in user
    Whoami,

    /// Print the list
    List,

    /// Add an item
    Add {
        /// Item name
        #[arg(required = true)]
        name: Vec<String>,
    },

    /// Check or uncheck an item
    Toggle {
        /// Item id
        id: i64,
    },

    /// Remove an item
    Remove {
        /// Item id
        id: i64,
    },

    /// Print the list again whenever anyone changes it (Ctrl-C to stop)
    Watch,

    /// Add ingredients read from a photo
    Scan {
        /// Image file
        image: PathBuf,
        /// Comma-separated 1-based positions to keep (default: all)
        #[arg(long, value_delimiter = ',')]
        pick: Vec<usize>,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Launch interactive TUI
    #[cfg(feature = "tui")]
    Tui,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let interactive = cli.command.is_none() || is_tui_command(cli.command.as_ref());
    init_logging(cli.verbose, interactive);

    let use_color = !cli.no_color && atty_check();
    let config = cli.config.as_deref();

    match cli.command {
        None => {
            #[cfg(feature = "tui")]
            {
                let app = app::App::new(config, cli.offline).await?;
                tui::run(app).await?;
            }
            #[cfg(not(feature = "tui"))]
            {
                eprintln!("TUI not available (built without 'tui' feature). Use a subcommand.");
                eprintln!("Run with --help for usage.");
                std::process::exit(1);
            }
        }
        Some(Command::Login { email, password }) => {
            let app = app::App::new(config, cli.offline).await?;
            commands::auth::login(&app, email.as_deref(), password, &cli.format).await?;
        }
        Some(Command::Logout) => {
            let app = app::App::new(config, cli.offline).await?;
            commands::auth::logout(&app).await?;
        }
        Some(Command::Whoami) => {
            let app = app::App::new(config, cli.offline).await?;
            commands::auth::whoami(&app, &cli.format).await?;
        }
        Some(Command::List) => {
            let app = app::App::new(config, cli.offline).await?;
            commands::list::run(&app, &cli.format, use_color).await?;
        }
        Some(Command::Add { name }) => {
            let app = app::App::new(config, cli.offline).await?;
            commands::edit::add(&app, &name.join(" "), &cli.format, use_color).await?;
        }
        Some(Command::Toggle { id }) => {
            let app = app::App::new(config, cli.offline).await?;
            commands::edit::toggle(&app, id, &cli.format, use_color).await?;
        }
        Some(Command::Remove { id }) => {
            let app = app::App::new(config, cli.offline).await?;
            commands::edit::remove(&app, id, &cli.format).await?;
        }
        Some(Command::Watch) => {
            let app = app::App::new(config, cli.offline).await?;
            commands::watch::run(&app, &cli.format, use_color).await?;
        }
        Some(Command::Scan { image, pick, yes }) => {
            let app = app::App::new(config, cli.offline).await?;
            commands::scan::run(&app, &image, &pick, yes, &cli.format, use_color).await?;
        }
        #[cfg(feature = "tui")]
        Some(Command::Tui) => {
            let app = app::App::new(config, cli.offline).await?;
            tui::run(app).await?;
        }
    }

    Ok(())
}

#[allow(unused_variables)]
fn is_tui_command(command: Option<&Command>) -> bool {
    #[cfg(feature = "tui")]
    {
        matches!(command, Some(Command::Tui))
    }
    #[cfg(not(feature = "tui"))]
    {
        false
    }
}

/// `RUST_LOG` wins; otherwise warnings only, debug with `-v`, and nothing
/// while the TUI owns the terminal
fn init_logging(verbose: bool, interactive: bool) {
    let default_filter = match (verbose, interactive) {
        (true, _) => "debug",
        (false, true) => "off",
        (false, false) => "warn",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

/// Check if stdout is a terminal (for color support)
fn atty_check() -> bool {
    unsafe { libc_isatty(1) != 0 }
}

/// Check if stdin is a terminal (not piped)
pub fn stdin_is_tty() -> bool {
    unsafe { libc_isatty(0) != 0 }
}

extern "C" {
    #[link_name = "isatty"]
    fn libc_isatty(fd: i32) -> i32;
}
