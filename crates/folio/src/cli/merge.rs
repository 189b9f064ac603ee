//! `folio merge`: reconcile a local block list against the server copy.

use std::path::Path;

use serde::Serialize;

use folio_core::block::{Block, LastSyncedIds, merge_blocks, should_merge};
use folio_core::error::Result;

use super::util::{print_json, read_json};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MergeReport {
    should_merge: bool,
    merged: Vec<Block>,
}

pub fn handle_merge(server: &Path, local: &Path, synced: Option<&Path>) -> Result<()> {
    let server: Vec<Block> = read_json(server)?;
    let local: Vec<Block> = read_json(local)?;
    let synced = match synced {
        Some(path) => read_json(path)?,
        None => LastSyncedIds::new(),
    };
    print_json(&reconcile(&server, &local, &synced))
}

/// Without a merge the server copy stands.
fn reconcile(server: &[Block], local: &[Block], synced: &LastSyncedIds) -> MergeReport {
    if should_merge(server, local, synced) {
        MergeReport {
            should_merge: true,
            merged: merge_blocks(server, local, synced),
        }
    } else {
        MergeReport {
            should_merge: false,
            merged: server.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsynced_local_block_is_kept() {
        let server = vec![Block::text("a", 0.0, "A")];
        let local = vec![Block::text("a", 0.0, "A"), Block::text("n", 1.0, "new")];
        let synced: LastSyncedIds = ["a".to_string()].into_iter().collect();

        let report = reconcile(&server, &local, &synced);
        assert!(report.should_merge);
        let ids: Vec<&str> = report.merged.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "n"]);
    }

    #[test]
    fn test_empty_local_takes_server() {
        let server = vec![Block::text("a", 0.0, "A")];
        let report = reconcile(&server, &[], &LastSyncedIds::new());
        assert!(!report.should_merge);
        assert_eq!(report.merged, server);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["shouldMerge"], false);
    }
}
