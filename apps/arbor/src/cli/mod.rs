//! # Arbor CLI Module
//!
//! This module implements the CLI interface for Arbor.
//!
//! ## Available Commands
//!
//! - `init` - Create stores
//! - `status` - Show repository counts and stores
//! - `tree` - Print a store's hierarchy
//! - `purge` - Run the cleanup workers once
//! - `daemon` - Run the cleanup workers on their schedule
//! - `export` - Write a snapshot of every row
//! - `import` - Replace the repository content from a snapshot
//! - `compact` - Compact the database file

mod commands;

use crate::daemon::Worker;
use crate::settings;
use arbor_core::ArborError;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Arbor - hierarchical node repository
///
/// Stores typed, aspect-decorated nodes in a parent/child graph, archives
/// deletions and purges what has aged out.
#[derive(Parser, Debug)]
#[command(name = "arbor")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the repository database
    #[arg(short = 'D', long, global = true, default_value = "arbor.db")]
    pub database: PathBuf,

    /// Configuration file (missing file means defaults)
    #[arg(short, long, global = true, default_value = "arbor.toml")]
    pub config: PathBuf,

    /// Content model file extending the system model
    #[arg(short, long, global = true)]
    pub model: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create stores, plus every store named in the archive mappings
    Init {
        /// Stores to create, as protocol://identifier
        #[arg(default_value = "workspace://SpacesStore")]
        stores: Vec<String>,
    },

    /// Show repository status
    Status,

    /// Print the primary hierarchy of a store
    Tree {
        /// Store to print
        #[arg(short, long, default_value = "workspace://SpacesStore")]
        store: String,

        /// Maximum depth below the root
        #[arg(short, long, default_value = "8")]
        depth: usize,
    },

    /// Run cleanup workers once
    Purge {
        /// Worker to run (both when omitted)
        #[arg(short, long, value_enum)]
        worker: Option<Worker>,
    },

    /// Run cleanup workers on their configured intervals until Ctrl+C
    Daemon,

    /// Export every row as a snapshot
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Replace the repository content with a snapshot
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Compact the database file
    Compact,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), ArborError> {
    let config = settings::load_config(&cli.config)?;
    let dictionary = settings::load_dictionary(cli.model.as_deref())?;
    let repo = settings::open_repository(Some(&cli.database), config, dictionary)?;
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Init { stores }) => cmd_init(&repo, &stores, json_mode),
        Some(Commands::Status) => cmd_status(&repo, &cli.database, json_mode),
        Some(Commands::Tree { store, depth }) => cmd_tree(&repo, &store, depth, json_mode),
        Some(Commands::Purge { worker }) => cmd_purge(&repo, worker, json_mode).await,
        Some(Commands::Daemon) => cmd_daemon(repo).await,
        Some(Commands::Export { output }) => cmd_export(&repo, &output),
        Some(Commands::Import { input }) => cmd_import(&repo, &input),
        Some(Commands::Compact) => cmd_compact(&repo),
        None => {
            // No subcommand - show status by default
            cmd_status(&repo, &cli.database, json_mode)
        }
    }
}
