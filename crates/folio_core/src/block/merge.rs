//! Three-way reconciliation of a local block set against the server's.
//!
//! `lastSyncedIds` stands in for the common ancestor: an id in the marker set
//! that one side no longer has was deleted on that side, while an id outside
//! the marker set was created since the last round trip and must survive.

use std::collections::HashMap;

use indexmap::IndexSet;

use super::{Block, LastSyncedIds};

/// Union of ids, server ids first, then local-only ids, each in input order.
fn union_ids<'a>(server: &'a [Block], local: &'a [Block]) -> IndexSet<&'a str> {
    server
        .iter()
        .chain(local.iter())
        .map(|b| b.id.as_str())
        .collect()
}

fn index(blocks: &[Block]) -> HashMap<&str, &Block> {
    blocks.iter().map(|b| (b.id.as_str(), b)).collect()
}

/// Whether the local and server sets have diverged since the last sync.
///
/// Always false for an empty local set: there is nothing local to protect.
pub fn should_merge(server: &[Block], local: &[Block], synced: &LastSyncedIds) -> bool {
    if local.is_empty() {
        return false;
    }

    let server_map = index(server);
    let local_map = index(local);

    union_ids(server, local).into_iter().any(|id| {
        if !synced.contains(id) {
            return true;
        }
        match (server_map.get(id), local_map.get(id)) {
            (Some(s), Some(l)) => s.updated_millis() != l.updated_millis(),
            _ => true,
        }
    })
}

/// Merge local and server blocks, returning the reconciled set sorted by
/// `order`.
///
/// Blocks on both sides resolve last-writer-wins on `updatedAt`, with ties
/// going to the local copy.
pub fn merge_blocks(server: &[Block], local: &[Block], synced: &LastSyncedIds) -> Vec<Block> {
    let server_map = index(server);
    let local_map = index(local);

    let mut merged: Vec<Block> = union_ids(server, local)
        .into_iter()
        .filter_map(|id| {
            let was_synced = synced.contains(id);
            match (server_map.get(id), local_map.get(id)) {
                (Some(s), Some(l)) => {
                    let winner = if l.updated_millis() >= s.updated_millis() {
                        l
                    } else {
                        s
                    };
                    Some((*winner).clone())
                }
                // deleted on the other side since the last sync
                (Some(_), None) | (None, Some(_)) if was_synced => None,
                (Some(only), None) | (None, Some(only)) => Some((*only).clone()),
                (None, None) => None,
            }
        })
        .collect();

    merged.sort_by(|a, b| a.order.total_cmp(&b.order));
    merged
}
