//! `folio push`: save a block list through the sync coordinator.
//!
//! The document is opened against the configured server (replaying any
//! backup left by an earlier run), the blocks are applied as one editor
//! update, and the pending save is flushed. Failed saves stay in the local
//! store for the next run.

use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use folio_core::block::Block;
use folio_core::config::Config;
use folio_core::error::{FolioError, Result};
use folio_core::store::LocalStore;
use folio_core::sync::{
    BlockRemote, CoordinatorConfig, DocumentContext, HttpBlockRemote, ShareType,
    SnapshotService, SyncCoordinator, SyncEvent, SyncState,
};

use super::util::{open_store, print_json, read_json};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PushReport {
    document_id: String,
    state: SyncState,
    block_count: usize,
    pending_backup: bool,
    notices: Vec<String>,
}

pub fn handle_push(config: &Config, document: &str, blocks: &Path, share: ShareType) -> Result<()> {
    let blocks: Vec<Block> = read_json(blocks)?;
    let remote = Arc::new(HttpBlockRemote::new(
        config.require_server_url()?,
        config.auth_token.clone(),
    ));
    let store = Arc::new(open_store(config)?);

    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(push(
        remote.clone(),
        remote,
        store,
        CoordinatorConfig::from(&config.sync),
        DocumentContext::new(document, share),
        blocks,
    ))?;

    print_json(&report)?;
    if report.state == SyncState::Synced {
        Ok(())
    } else {
        Err(FolioError::Network(format!(
            "Sync of '{}' ended in state '{}'",
            report.document_id, report.state
        )))
    }
}

async fn push(
    remote: Arc<dyn BlockRemote>,
    snapshots: Arc<dyn SnapshotService>,
    store: Arc<dyn LocalStore>,
    config: CoordinatorConfig,
    ctx: DocumentContext,
    blocks: Vec<Block>,
) -> Result<PushReport> {
    let coordinator = SyncCoordinator::builder(remote, store)
        .snapshots(snapshots)
        .config(config)
        .build();

    let notices = Arc::new(Mutex::new(Vec::new()));
    let sink = notices.clone();
    coordinator.subscribe(move |event| {
        if let SyncEvent::Notice(notice) = event {
            log::info!("{}: {}", notice.title, notice.message);
            sink.lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(format!("{}: {}", notice.title, notice.message));
        }
    });

    coordinator.open_document(ctx.clone()).await?;
    coordinator.on_doc_update(&blocks);
    coordinator.flush().await;

    let notices = notices.lock().unwrap_or_else(|e| e.into_inner()).clone();
    Ok(PushReport {
        state: coordinator.state(),
        block_count: coordinator.baseline().map_or(0, |b| b.len()),
        pending_backup: !ctx.share.is_local() && coordinator.backups().has_pending(&ctx.id)?,
        document_id: ctx.id,
        notices,
    })
}
