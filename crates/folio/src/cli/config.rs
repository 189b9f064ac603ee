//! Config command handlers

use std::path::{Path, PathBuf};

use serde_json::json;

use folio_core::config::Config;
use folio_core::error::{FolioError, Result};

use super::args::ConfigCommands;
use super::util::print_json;

pub fn handle_config_command(command: ConfigCommands, config_override: Option<PathBuf>) -> Result<()> {
    let path = match config_override {
        Some(path) => path,
        None => Config::config_path().ok_or(FolioError::NoConfigDir)?,
    };

    match command {
        ConfigCommands::Show => show_config(&path),
        ConfigCommands::Init {
            server,
            token,
            websocket,
            store,
            force,
        } => {
            let mut config = Config {
                server_url: server,
                auth_token: token,
                store_path: store,
                ..Default::default()
            };
            config.collab.websocket_url = websocket;
            init_config(&path, &config, force)
        }
    }
}

fn show_config(path: &Path) -> Result<()> {
    let config = Config::load_from_or_default(path)?;
    print_json(&json!({
        "path": path,
        "exists": path.exists(),
        "config": config,
    }))
}

fn init_config(path: &Path, config: &Config, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(FolioError::FileWrite {
            path: path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "config already exists (use --force to overwrite)",
            ),
        });
    }
    config.save_to(path)?;
    log::info!("Wrote config to {}", path.display());
    print_json(&json!({ "path": path, "config": config }))
}
