//! CLI command definitions and dispatch.
//!
//! Each subcommand group lives in its own submodule, mirroring the way a
//! GUI splits library management, playback, and the vote server into
//! separate dialogs/services — here they are separate command groups
//! instead:
//! - `scan`: walk a directory, hash and tag-scan new files (C12/C13)
//! - `catalogue`: inspect songs, filters (C8), and templates (C9)
//! - `play`: run the full playback chain (C2-C6, C16, C17) from a terminal
//! - `tempo`: run the tempo detector (C14) on one file
//! - `server`: the embedded vote server (C18) and backup maintenance (§4.15)

mod catalogue;
mod play;
mod scan;
mod server;
mod tempo;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::runtime::Runtime;

/// SkauTan engine CLI.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan a directory for new audio files, hashing and tag-scanning them.
    Scan {
        /// Directory to walk recursively.
        path: PathBuf,
    },
    /// List every song currently in the catalogue.
    List,
    /// Manage filters (C8).
    Filter {
        #[command(subcommand)]
        action: FilterCommands,
    },
    /// Manage templates (C9).
    Template {
        #[command(subcommand)]
        action: TemplateCommands,
    },
    /// Build a playlist and play it through the default audio device.
    Play {
        /// Root directory to build the playlist from when `--template` is
        /// not given: every catalogued song under this root is queued.
        root: PathBuf,
        /// Build the playlist from a saved template instead of `root`.
        #[arg(long)]
        template: Option<String>,
    },
    /// Run the tempo detector on a single file.
    TempoDetect {
        path: PathBuf,
        /// Genre code used to pick the competition tempo range (e.g. SW, VW, QS).
        #[arg(long, default_value = "SW")]
        genre: String,
    },
    /// Start the embedded HTTP vote server standalone.
    VoteServer,
    /// Run the daily backup check once, immediately.
    Backup,
}

#[derive(Subcommand)]
pub enum FilterCommands {
    /// List every stored filter.
    List,
    /// Create a new, empty (always-matching) filter.
    Create { name: String },
    /// Delete a filter by id.
    Delete { id: i64 },
    /// Print a filter's node tree and its current match count.
    Show { id: i64 },
}

#[derive(Subcommand)]
pub enum TemplateCommands {
    /// List every stored template.
    List,
    /// Create a new, empty template.
    Create { name: String },
    /// Append a filter reference to a template.
    AddFilter {
        template_id: i64,
        filter_id: i64,
        #[arg(long)]
        duration_limit: Option<f64>,
    },
    /// Delete a template by id.
    Delete { id: i64 },
}

/// Open the configured database (through the same backup/migration path a
/// long-running process uses) and load it into a [`crate::library::LibraryStore`].
async fn open_store(config: &crate::config::Config) -> anyhow::Result<crate::library::LibraryStore> {
    if let Some(parent) = config.library.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let pool = crate::db::open_with_backup(&config.library.db_path, Some(&config.library.backup_dir)).await?;
    Ok(crate::library::LibraryStore::open(pool).await?)
}

/// Run the selected subcommand to completion.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let rt = Runtime::new()?;

    match &cli.command {
        Commands::Scan { path } => rt.block_on(scan::run(path)),
        Commands::List => rt.block_on(catalogue::list()),
        Commands::Filter { action } => rt.block_on(catalogue::filter(action)),
        Commands::Template { action } => rt.block_on(catalogue::template(action)),
        Commands::Play { root, template } => play::run(&rt, root, template.as_deref()),
        Commands::TempoDetect { path, genre } => tempo::run(path, genre),
        Commands::VoteServer => rt.block_on(server::vote_server()),
        Commands::Backup => server::backup(),
    }
}
