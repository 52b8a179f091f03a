//! # brbridge
//!
//! Bridge between Bison Relay group chats and Matrix rooms.
//!
//! ## Commands
//!
//! - `run` (default): start the bridge
//! - `allow add|remove|list`: manage identities whose group chat invites
//!   are accepted automatically
//!
//! ## Example
//!
//! ```bash
//! # Start with <data_dir>/brbridge.toml
//! brbridge
//!
//! # Accept invites from a Bison Relay user
//! brbridge allow add 3f5c...e1
//!
//! # Use a different data directory and config file
//! brbridge --data-dir /srv/brbridge --config /etc/brbridge.toml run
//! ```

use anyhow::{Context, Result};
use brbridge::config::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{allow, run};

/// Bridge between Bison Relay group chats and Matrix rooms.
#[derive(Parser, Debug)]
#[command(name = "brbridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory for the sync cursor, allow-list and logs
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file (default: <data_dir>/brbridge.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the bridge
    Run,

    /// Manage the invite allow-list
    Allow {
        #[command(subcommand)]
        action: AllowAction,
    },
}

#[derive(Subcommand, Debug)]
enum AllowAction {
    /// Accept group chat invites from this identity
    Add {
        /// Identity as 64 hex characters
        id: String,
    },

    /// Stop accepting invites from this identity
    Remove {
        /// Identity as 64 hex characters
        id: String,
    },

    /// Show allowed identities
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine data directory
    let data_dir = match cli.data_dir {
        Some(dir) => brbridge::config::expand_tilde(&dir),
        None => default_data_dir()?,
    };

    // Ensure data directory exists
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let config_path = cli
                .config
                .unwrap_or_else(|| Config::default_path(&data_dir));
            run::run(&data_dir, &config_path).await?;
        }
        Commands::Allow { action } => match action {
            AllowAction::Add { id } => allow::add(&data_dir, &id).await?,
            AllowAction::Remove { id } => allow::remove(&data_dir, &id).await?,
            AllowAction::List => allow::list(&data_dir).await?,
        },
    }

    Ok(())
}

/// Get the default data directory for brbridge.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("org", "brbridge", "brbridge")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
