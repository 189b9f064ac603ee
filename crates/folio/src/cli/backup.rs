//! `folio backup`: inspect offline delta backups in the local store.

use std::sync::Arc;

use serde_json::json;

use folio_core::config::Config;
use folio_core::error::Result;
use folio_core::store::OfflineBackupStore;

use super::args::BackupCommands;
use super::util::{open_store, print_json};

pub fn handle_backup_command(command: BackupCommands, config: &Config) -> Result<()> {
    let backups = OfflineBackupStore::new(Arc::new(open_store(config)?));
    run(command, &backups)
}

fn run(command: BackupCommands, backups: &OfflineBackupStore) -> Result<()> {
    match command {
        BackupCommands::List => print_json(&backups.list()?),
        BackupCommands::Show { document } => match backups.find(&document)? {
            Some(deltas) => print_json(&deltas),
            None => print_json(&json!([])),
        },
        BackupCommands::Clear { document } => {
            let had_backup = backups.has_pending(&document)?;
            backups.delete(&document)?;
            if had_backup {
                log::info!("Cleared backup for {}", document);
            }
            print_json(&json!({ "documentId": document, "cleared": had_backup }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use folio_core::block::{DeltaAction, DeltaBlock};
    use folio_core::store::SqliteStore;

    #[test]
    fn test_show_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("folio.db")).unwrap());
        let backups = OfflineBackupStore::new(store.clone());
        backups
            .save(
                "doc-1",
                &[DeltaBlock::bare("a", DeltaAction::Delete, Utc::now())],
            )
            .unwrap();

        run(BackupCommands::List, &backups).unwrap();
        run(
            BackupCommands::Show {
                document: "doc-1".into(),
            },
            &backups,
        )
        .unwrap();
        run(
            BackupCommands::Clear {
                document: "doc-1".into(),
            },
            &backups,
        )
        .unwrap();

        assert!(backups.find("doc-1").unwrap().is_none());
    }
}
