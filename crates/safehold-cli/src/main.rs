//! safehold - line-oriented KeePass client
//!
//! Reads commands from stdin; type `help` for the list.

mod clipboard;
mod config;
mod handlers;

use anyhow::{Context, Result};
use clap::Parser;
use safehold_core::{DatabaseManager, KeepassManager, ManualIdleSource, Session, SessionChannels};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use clipboard::SystemClipboard;
use config::Config;
use handlers::{Command, Flow};

/// Environment variable holding the master password.
const PASSWORD_VAR: &str = "SAFEHOLD_PASSWORD";

/// safehold - a KeePass client with auto-lock and autosave
#[derive(Parser, Debug)]
#[command(name = "safehold")]
#[command(about = "A line-oriented KeePass client with auto-lock and autosave")]
struct Args {
    /// Path to the config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the KeePass database file, overriding the config
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("safehold=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(database) = args.database {
        config.database_path = database;
    }
    tracing::info!("Starting safehold with database: {:?}", config.database_path);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let password = match std::env::var(PASSWORD_VAR) {
        Ok(password) => password,
        Err(_) => {
            eprintln!("Password:");
            lines
                .next_line()
                .await?
                .context("No password given on stdin")?
        }
    };

    let path = config.database_path.clone();
    let manager = tokio::task::spawn_blocking(move || KeepassManager::open(&path, &password))
        .await
        .context("Database open task failed")??;

    let idle = ManualIdleSource::new();
    let (mut session, channels) = Session::new(
        Arc::new(manager),
        SystemClipboard::new(),
        Box::new(idle.clone()),
        config.session.clone(),
    );
    let SessionChannels {
        mut events,
        mut updates,
    } = channels;

    handlers::print_listing(&session)?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let result = line
                    .parse::<Command>()
                    .and_then(|command| handlers::execute(&mut session, &idle, command));
                match result {
                    Ok(Flow::Quit) => break,
                    Ok(Flow::Continue) => {}
                    Err(e) => println!("error: {:#}", e),
                }
            }
            Some(event) = events.recv() => session.handle_event(event),
            Some(update) = updates.recv() => handlers::print_update(&session, update),
        }
    }

    // Unsaved changes are written on exit when autosave is on.
    if session.settings().save_automatically {
        if let Err(e) = session.save_pending(&mut events).await {
            tracing::error!("Failed to save on exit: {}", e);
        }
    } else if session.database().is_dirty() {
        tracing::warn!("Exiting with unsaved changes");
    }

    session.shutdown();
    Ok(())
}
