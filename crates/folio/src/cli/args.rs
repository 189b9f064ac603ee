//! Command-line argument structures and enums

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use folio_core::sync::ShareType;

#[derive(Parser)]
#[command(name = "folio")]
#[command(version)]
#[command(about = "Inspect and sync Folio chapter blocks", long_about = None)]
pub struct Cli {
    /// Use this config file instead of ~/.config/folio/config.toml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log debug output to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the deltas that turn one block list into another
    Diff {
        /// JSON file with the previous block list
        previous: PathBuf,

        /// JSON file with the current block list
        current: PathBuf,
    },

    /// Reconcile a local block list against the server copy
    Merge {
        /// JSON file with the server block list
        #[arg(long)]
        server: PathBuf,

        /// JSON file with the local block list
        #[arg(long)]
        local: PathBuf,

        /// JSON file with the ids acknowledged by the last sync
        #[arg(long)]
        synced: Option<PathBuf>,
    },

    /// Inspect offline delta backups in the local store
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },

    /// Send a block list to the configured server as an editor update
    Push {
        /// Document id
        document: String,

        /// JSON file with the block list to save
        blocks: PathBuf,

        /// How the document is shared
        #[arg(long, value_enum, default_value_t = ShareArg::Private)]
        share: ShareArg,
    },

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum BackupCommands {
    /// List documents with a pending backup
    List,

    /// Print the pending deltas for a document
    Show {
        /// Document id
        document: String,
    },

    /// Drop the pending backup for a document
    Clear {
        /// Document id
        document: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write a config file
    Init {
        /// Base URL of the block API
        #[arg(long)]
        server: Option<String>,

        /// Bearer token for the server
        #[arg(long)]
        token: Option<String>,

        /// Realtime collaboration endpoint
        #[arg(long)]
        websocket: Option<String>,

        /// Location of the local store
        #[arg(long)]
        store: Option<PathBuf>,

        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShareArg {
    Local,
    Private,
    Public,
}

impl From<ShareArg> for ShareType {
    fn from(arg: ShareArg) -> Self {
        match arg {
            ShareArg::Local => ShareType::Local,
            ShareArg::Private => ShareType::Private,
            ShareArg::Public => ShareType::Public,
        }
    }
}
