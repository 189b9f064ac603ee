//! The `folio` command-line interface.

/// Clap argument definitions
mod args;

/// `folio backup` handlers
mod backup;

/// Config command handlers
mod config;

/// `folio diff`
mod diff;

/// `folio merge`
mod merge;

/// `folio push` (delta sync against the configured server)
mod push;

/// Shared CLI utilities
mod util;

use clap::Parser;

use folio_core::config::Config;
use folio_core::error::Result;

pub use args::Cli;
use args::Commands;

/// Main entry point for the CLI
pub fn run_cli() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = execute(cli) {
        eprintln!("✗ {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Diff { previous, current } => diff::handle_diff(&previous, &current),

        Commands::Merge {
            server,
            local,
            synced,
        } => merge::handle_merge(&server, &local, synced.as_deref()),

        Commands::Backup { command } => {
            let config = load_config(&cli.config)?;
            backup::handle_backup_command(command, &config)
        }

        Commands::Push {
            document,
            blocks,
            share,
        } => {
            let config = load_config(&cli.config)?;
            push::handle_push(&config, &document, &blocks, share.into())
        }

        Commands::Config { command } => config::handle_config_command(command, cli.config),
    }
}

/// Load the config from `--config` or the default location.
fn load_config(path: &Option<std::path::PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}
