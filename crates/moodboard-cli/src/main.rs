mod dispatch;
mod telegram;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use moodboard_engine::{build_controller, BotConfig, StoreBackend};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::dispatch::{handle_webhook_body, read_webhook_body, run_poll_loop};
use crate::telegram::TelegramClient;

#[derive(Debug, Parser)]
#[command(
    name = "moodboard-bot",
    version,
    about = "Telegram bot that restyles photos with a chat's saved references"
)]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,
    #[command(subcommand)]
    command: Command,
}

/// Flags that take precedence over the environment.
#[derive(Debug, Args)]
struct Overrides {
    #[arg(long, global = true)]
    telegram_token: Option<String>,
    #[arg(long, global = true)]
    store: Option<StoreBackend>,
    #[arg(long, global = true)]
    sqlite_path: Option<PathBuf>,
    #[arg(long, global = true)]
    styles_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[arg(long, global = true)]
    model: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Long-poll getUpdates until interrupted.
    Poll,
    /// Handle one webhook body and print the HTTP status it deserves.
    HandleUpdate {
        /// File holding the update JSON, or `-` for stdin.
        #[arg(default_value = "-")]
        body: String,
    },
    /// Publish the command menu to Telegram.
    RegisterCommands,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("moodboard-bot error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = BotConfig::from_env()?;
    apply_overrides(&mut config, cli.overrides);
    let token = config
        .telegram_token
        .clone()
        .context("TELEGRAM_BOT_TOKEN is not set")?;
    let client = Arc::new(TelegramClient::new(token));

    match cli.command {
        Command::Poll => {
            let controller = build_controller(&config, client.clone())?;
            if let Err(err) = client.set_my_commands() {
                warn!(error = format!("{err:#}"), "command menu registration failed");
            }
            run_poll_loop(&controller, &client)
        }
        Command::HandleUpdate { body } => {
            let controller = build_controller(&config, client.clone())?;
            let raw = read_webhook_body(&body)?;
            let status = handle_webhook_body(&controller, client.as_ref(), &raw);
            println!("{}", status.code());
            Ok(if status.code() == 200 { 0 } else { 1 })
        }
        Command::RegisterCommands => {
            client.set_my_commands()?;
            info!("command menu registered");
            Ok(0)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn apply_overrides(config: &mut BotConfig, overrides: Overrides) {
    if let Some(token) = overrides.telegram_token {
        config.telegram_token = Some(token);
    }
    if let Some(backend) = overrides.store {
        config.store.backend = backend;
    }
    if let Some(path) = overrides.sqlite_path {
        config.store.sqlite_path = path;
    }
    if let Some(dir) = overrides.styles_dir {
        config.store.styles_dir = dir;
    }
    if let Some(path) = overrides.events {
        config.events_path = Some(path);
    }
    if let Some(model) = overrides.model {
        config.gemini.model = model;
    }
}
