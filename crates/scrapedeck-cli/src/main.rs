//! Scrapedeck - terminal admin console for the scraping service.
//!
//! Signs an operator in, submits scrape jobs and browses or deletes the
//! stored JSON artifacts. Session handling lives in `scrapedeck-core`.

mod commands;

use std::io;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use scrapedeck_core::Config;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::TerminalNavigator;

#[derive(Parser)]
#[command(name = "scrapedeck", version, about = "Admin console for the scraping service")]
struct Cli {
    /// API base URL (overrides the config file)
    #[arg(long, global = true, env = "SCRAPEDECK_API_URL")]
    api_url: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and store the session
    Login {
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Show the signed-in operator
    Whoami,
    /// Browse stored scrape results
    #[command(subcommand)]
    Files(FilesCommand),
    /// Scrape a web page
    Scrape(ScrapeArgs),
    /// Scrape comments from a YouTube video
    Youtube {
        url: String,
        #[arg(long, default_value_t = 100)]
        limit: u32,
    },
    /// Manage console users
    #[command(subcommand)]
    Users(UsersCommand),
}

#[derive(Subcommand)]
enum FilesCommand {
    List,
    Show { name: String },
    Delete { name: String },
}

#[derive(Args)]
struct ScrapeArgs {
    url: String,

    /// Plain HTTP fetch instead of a browser render
    #[arg(long = "static")]
    static_fetch: bool,

    /// Custom selector as name=css or name=css@attr (repeatable)
    #[arg(long = "selector", value_name = "NAME=CSS[@ATTR]")]
    selectors: Vec<String>,
}

#[derive(Subcommand)]
enum UsersCommand {
    List,
    Delete {
        id: i64,
    },
    /// Switch a user between admin and superadmin
    ToggleRole {
        id: i64,
    },
    Update {
        id: i64,
        #[arg(long)]
        username: String,
        /// Prompt for a new password
        #[arg(long)]
        password: bool,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    init_tracing();
    info!("Scrapedeck starting");

    let mut config = Config::load()?;
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }

    let console = scrapedeck_core::Console::from_config(&config, Arc::new(TerminalNavigator))?;
    let ctx = commands::Context {
        console,
        config,
        json: cli.json,
    };

    let ok = match cli.command {
        Command::Login { username } => commands::login(&ctx, username).await?,
        Command::Logout => commands::logout(&ctx).await,
        Command::Whoami => commands::whoami(&ctx).await?,
        Command::Files(FilesCommand::List) => commands::list_files(&ctx).await?,
        Command::Files(FilesCommand::Show { name }) => commands::show_file(&ctx, &name).await?,
        Command::Files(FilesCommand::Delete { name }) => commands::delete_file(&ctx, &name).await?,
        Command::Scrape(args) => {
            commands::scrape(&ctx, &args.url, args.static_fetch, &args.selectors).await?
        }
        Command::Youtube { url, limit } => commands::youtube(&ctx, &url, limit).await?,
        Command::Users(UsersCommand::List) => commands::list_users(&ctx).await?,
        Command::Users(UsersCommand::Delete { id }) => commands::delete_user(&ctx, id).await?,
        Command::Users(UsersCommand::ToggleRole { id }) => commands::toggle_role(&ctx, id).await?,
        Command::Users(UsersCommand::Update {
            id,
            username,
            password,
        }) => commands::update_user(&ctx, id, username, password).await?,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
