//! Delta sync coordinator.
//!
//! Owns the baseline (the block list last acknowledged by the server), the
//! [`SyncStateMachine`], and the debounced save. The host feeds it editor
//! changes through [`SyncCoordinator::on_doc_update`] and connectivity changes
//! through [`SyncCoordinator::notify_online`]; it reports back through
//! [`SyncEvent`]s.
//!
//! # Lifecycle
//!
//! ```text
//! open_document ─▶ replay backup ─▶ fetch ─▶ reconcile with replica ─▶ Loaded
//!                                                                      │
//!          ┌──────────────── on_doc_update (debounced) ◀───────────────┘
//!          ▼
//!   diff vs baseline ─▶ offline? park in backup : send in chunks ─▶ advance
//! ```
//!
//! Network failures never escape: they become an `Error` state plus a
//! [`Notice`], and the unsent deltas go to the [`OfflineBackupStore`].

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::block::{
    Block, DeltaBlock, LastSyncedIds, apply_deltas, diff_blocks, merge_blocks, should_merge,
};
use crate::collab::CollabDoc;
use crate::config::SyncConfig;
use crate::error::{FolioError, Result};
use crate::store::{LocalStore, OfflineBackupStore};

use super::debounce::{DebounceConfig, Debouncer};
use super::remote::{
    BlockRemote, Connectivity, DocumentContext, NoSnapshots, OnlineFlag, SnapshotReason,
    SnapshotService,
};
use super::state::{SyncState, SyncStateMachine, SyncTrigger};

/// Anything the editor can hand over as "the current document".
pub trait EditorDocument {
    /// Flatten into an order-sorted block array.
    fn to_blocks(&self) -> Vec<Block>;
}

impl EditorDocument for Vec<Block> {
    fn to_blocks(&self) -> Vec<Block> {
        self.clone()
    }
}

impl EditorDocument for [Block] {
    fn to_blocks(&self) -> Vec<Block> {
        self.to_vec()
    }
}

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// A non-blocking message for the user (toast, status line).
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

/// Events emitted to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    StateChanged(SyncState),
    /// Initialization finished; `blocks` is what the editor should show.
    Loaded {
        document_id: String,
        blocks: Vec<Block>,
    },
    /// A save was acknowledged and the baseline moved forward.
    BaselineAdvanced {
        document_id: String,
        block_count: usize,
    },
    Notice(Notice),
}

/// Callback registered with [`SyncCoordinator::subscribe`].
pub type SyncObserver = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Handle returned by [`SyncCoordinator::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Coordinator timings and batching.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinatorConfig {
    pub debounce: DebounceConfig,
    /// Deltas per request for shared documents.
    pub chunk_size: usize,
    /// Window for autosave snapshots.
    pub autosave: DebounceConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for CoordinatorConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            debounce: DebounceConfig::from_millis(config.debounce_ms, config.max_wait_ms),
            chunk_size: config.chunk_size.max(1),
            autosave: DebounceConfig::from_millis(config.autosave_ms, config.autosave_ms),
        }
    }
}

struct Shared {
    context: Option<DocumentContext>,
    /// Bumped on every (re)initialization; responses carrying an older value
    /// are discarded.
    generation: u64,
    machine: SyncStateMachine,
    baseline: Option<Vec<Block>>,
    initialized: bool,
    loading: bool,
    /// Latest save rejected because a request was in flight.
    deferred: Option<Vec<Block>>,
    /// A debounced save has fired and its request has not settled.
    saving: bool,
    /// A retry arrived while `saving`; re-initialize once it settles.
    reinit_pending: bool,
}

struct Inner {
    remote: Arc<dyn BlockRemote>,
    snapshots: Arc<dyn SnapshotService>,
    connectivity: Arc<dyn Connectivity>,
    store: Arc<dyn LocalStore>,
    backups: OfflineBackupStore,
    config: CoordinatorConfig,
    shared: Mutex<Shared>,
    observers: Mutex<Vec<(SubscriptionId, SyncObserver)>>,
    next_subscription: Mutex<u64>,
    debouncer: Debouncer<Vec<Block>>,
    autosave: Debouncer<String>,
}

/// Builder for [`SyncCoordinator`].
pub struct SyncCoordinatorBuilder {
    remote: Arc<dyn BlockRemote>,
    store: Arc<dyn LocalStore>,
    snapshots: Arc<dyn SnapshotService>,
    connectivity: Arc<dyn Connectivity>,
    config: CoordinatorConfig,
}

impl SyncCoordinatorBuilder {
    pub fn snapshots(mut self, snapshots: Arc<dyn SnapshotService>) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> SyncCoordinator {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let save_weak = weak.clone();
            let debouncer = Debouncer::new(self.config.debounce, move |batch: Vec<Vec<Block>>| {
                let weak = save_weak.clone();
                Box::pin(async move {
                    // only the newest document state matters
                    if let Some(inner) = weak.upgrade()
                        && let Some(blocks) = batch.into_iter().last()
                    {
                        inner.save(blocks).await;
                    }
                })
            });
            let snapshot_weak = weak.clone();
            let autosave = Debouncer::new(self.config.autosave, move |batch: Vec<String>| {
                let weak = snapshot_weak.clone();
                Box::pin(async move {
                    if let Some(inner) = weak.upgrade()
                        && let Some(document_id) = batch.into_iter().last()
                    {
                        inner.autosave_snapshot(&document_id).await;
                    }
                })
            });

            Inner {
                backups: OfflineBackupStore::new(Arc::clone(&self.store)),
                remote: self.remote,
                snapshots: self.snapshots,
                connectivity: self.connectivity,
                store: self.store,
                config: self.config,
                shared: Mutex::new(Shared {
                    context: None,
                    generation: 0,
                    machine: SyncStateMachine::new(),
                    baseline: None,
                    initialized: false,
                    loading: false,
                    deferred: None,
                    saving: false,
                    reinit_pending: false,
                }),
                observers: Mutex::new(Vec::new()),
                next_subscription: Mutex::new(0),
                debouncer,
                autosave,
            }
        });
        SyncCoordinator { inner }
    }
}

/// Keeps one open document in sync with the remote block store.
///
/// Cheap to clone; clones share state. Must be used from within a tokio
/// runtime.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl SyncCoordinator {
    pub fn builder(remote: Arc<dyn BlockRemote>, store: Arc<dyn LocalStore>) -> SyncCoordinatorBuilder {
        SyncCoordinatorBuilder {
            remote,
            store,
            snapshots: Arc::new(NoSnapshots),
            connectivity: Arc::new(OnlineFlag::default()),
            config: CoordinatorConfig::default(),
        }
    }

    /// Load a document, replacing whatever was open.
    ///
    /// Pending debounced saves for the previous document are dropped; its
    /// pending autosave snapshot is taken first. When offline, a shared
    /// document stays uninitialized until [`notify_online`](Self::notify_online).
    ///
    /// # Errors
    ///
    /// Returns the failure that ended initialization. By then the state is
    /// already `Error` and a notice was emitted.
    pub async fn open_document(&self, ctx: DocumentContext) -> Result<()> {
        self.inner.debouncer.cancel();
        self.inner.autosave.flush().await;
        self.inner.reset(Some(ctx.clone()));

        if !ctx.share.is_local() && !self.inner.connectivity.is_online() {
            log::info!(
                "[SyncCoordinator] Offline, deferring load of {} until online",
                ctx.id
            );
            return Ok(());
        }
        self.inner.initialize(ctx).await
    }

    /// Forget the open document without saving pending edits.
    ///
    /// A pending autosave snapshot is still taken, on a background task.
    pub fn close(&self) {
        self.inner.debouncer.cancel();
        self.inner.autosave.fire_now();
        self.inner.reset(None);
    }

    /// Record an editor change, schedule a debounced save and re-arm the
    /// autosave snapshot.
    ///
    /// Ignored until the document is loaded, or when editing is not
    /// permitted.
    pub fn on_doc_update<D: EditorDocument + ?Sized>(&self, doc: &D) {
        let mut events = Vec::new();
        let document_id = {
            let mut shared = self.inner.lock();
            let Some(ctx) = shared.context.as_ref().filter(|c| c.can_edit) else {
                return;
            };
            let document_id = ctx.id.clone();
            if !shared.initialized {
                return;
            }
            Inner::transition(&mut shared, SyncTrigger::Edit, &mut events);
            document_id
        };
        self.inner.emit(events);
        self.inner.debouncer.call(doc.to_blocks());
        self.inner.autosave.call(document_id);
    }

    /// The host regained connectivity.
    ///
    /// Re-initializes the open document, which replays any pending backup.
    pub async fn notify_online(&self) -> Result<()> {
        self.retry("online").await
    }

    /// The host window regained focus.
    ///
    /// Re-initializes only when something is outstanding: a pending backup,
    /// an `Error` state, or a load deferred while offline.
    pub async fn notify_focus(&self) -> Result<()> {
        let Some(ctx) = self.document() else {
            return Ok(());
        };
        let outstanding = !self.is_initialized()
            || self.state() == SyncState::Error
            || (!ctx.share.is_local() && self.inner.backups.has_pending(&ctx.id)?);
        if outstanding {
            self.retry("focus").await
        } else {
            Ok(())
        }
    }

    async fn retry(&self, reason: &str) -> Result<()> {
        let ctx = {
            let mut shared = self.inner.lock();
            let ctx = match &shared.context {
                Some(ctx) if !shared.loading => ctx.clone(),
                _ => return Ok(()),
            };
            if shared.saving {
                log::debug!(
                    "[SyncCoordinator] Save in flight, re-initializing {} after it settles",
                    ctx.id
                );
                shared.reinit_pending = true;
                return Ok(());
            }
            ctx
        };
        if !ctx.share.is_local() && !self.inner.connectivity.is_online() {
            return Ok(());
        }
        log::info!("[SyncCoordinator] Re-initializing {} on {}", ctx.id, reason);
        self.inner.initialize(ctx).await
    }

    /// Run the pending debounced save now and wait for it.
    pub async fn flush(&self) {
        self.inner.debouncer.flush().await;
    }

    /// Take the pending autosave snapshot now and wait for it.
    pub async fn flush_autosave(&self) {
        self.inner.autosave.flush().await;
    }

    /// Register an observer. Observers run on the task that produced the
    /// event and must not block.
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = {
            let mut next = self
                .inner
                .next_subscription
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *next += 1;
            SubscriptionId(*next)
        };
        self.inner
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(observer)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(sub, _)| *sub != id);
    }

    pub fn state(&self) -> SyncState {
        self.inner.lock().machine.state()
    }

    pub fn document(&self) -> Option<DocumentContext> {
        self.inner.lock().context.clone()
    }

    /// The last acknowledged block list, once loaded.
    pub fn baseline(&self) -> Option<Vec<Block>> {
        self.inner.lock().baseline.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().initialized
    }

    pub fn backups(&self) -> &OfflineBackupStore {
        &self.inner.backups
    }
}

/// Result of a successful load.
struct Loaded {
    baseline: Vec<Block>,
    /// Blocks to show in the editor (the merge result when a merge happened).
    initial: Vec<Block>,
    /// Set when the post-merge push failed.
    push_error: Option<crate::error::FolioError>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Point at `context` (or nothing) with no loaded state.
    fn reset(&self, context: Option<DocumentContext>) {
        let mut shared = self.lock();
        shared.generation += 1;
        shared.context = context;
        shared.initialized = false;
        shared.loading = false;
        shared.baseline = None;
        shared.deferred = None;
        shared.saving = false;
        shared.reinit_pending = false;
    }

    fn transition(shared: &mut Shared, trigger: SyncTrigger, events: &mut Vec<SyncEvent>) {
        let before = shared.machine.state();
        match shared.machine.apply(trigger) {
            Ok(after) if after != before => events.push(SyncEvent::StateChanged(after)),
            Ok(_) => {}
            Err(e) => log::warn!("[SyncCoordinator] {}", e),
        }
    }

    fn emit(&self, events: Vec<SyncEvent>) {
        if events.is_empty() {
            return;
        }
        let observers: Vec<SyncObserver> = self
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();
        for event in &events {
            for observer in &observers {
                observer(event);
            }
        }
    }

    fn notice(level: NoticeLevel, title: &str, message: &str) -> SyncEvent {
        SyncEvent::Notice(Notice {
            level,
            title: title.to_string(),
            message: message.to_string(),
        })
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    async fn initialize(&self, ctx: DocumentContext) -> Result<()> {
        let mut events = Vec::new();
        let generation = {
            let mut shared = self.lock();
            shared.generation += 1;
            shared.context = Some(ctx.clone());
            shared.loading = true;
            Self::transition(&mut shared, SyncTrigger::Load, &mut events);
            shared.generation
        };
        self.emit(events);

        let result = self.load(&ctx, generation).await;

        let mut events = Vec::new();
        let outcome = {
            let mut shared = self.lock();
            if shared.generation != generation {
                log::debug!("[SyncCoordinator] Discarding superseded load of {}", ctx.id);
                return Ok(());
            }
            shared.loading = false;
            match result {
                Ok(loaded) => {
                    shared.baseline = Some(loaded.baseline.clone());
                    shared.initialized = true;
                    match &loaded.push_error {
                        None => Self::transition(&mut shared, SyncTrigger::Succeeded, &mut events),
                        Some(_) => {
                            Self::transition(&mut shared, SyncTrigger::Failed, &mut events);
                            events.push(Self::notice(
                                NoticeLevel::Error,
                                "Failed to save blocks",
                                "Merged changes could not be sent. They are kept on this device.",
                            ));
                        }
                    }
                    events.push(SyncEvent::Loaded {
                        document_id: ctx.id.clone(),
                        blocks: loaded.initial,
                    });
                    Ok(loaded.baseline)
                }
                Err(e) => {
                    Self::transition(&mut shared, SyncTrigger::Failed, &mut events);
                    events.push(Self::notice(
                        NoticeLevel::Error,
                        "Failed to load blocks",
                        "Could not fetch the initial block data.",
                    ));
                    Err(e)
                }
            }
        };

        match outcome {
            Ok(baseline) => {
                if let Err(e) = self
                    .store
                    .save_synced_ids(&ctx.id, &LastSyncedIds::from_blocks(&baseline))
                {
                    log::warn!("[SyncCoordinator] Failed to persist synced ids: {}", e);
                }
                log::info!(
                    "[SyncCoordinator] Loaded {} ({} blocks)",
                    ctx.id,
                    baseline.len()
                );
                self.emit(events);
                self.settle();
                Ok(())
            }
            Err(e) => {
                log::error!("[SyncCoordinator] Failed to initialize {}: {}", ctx.id, e);
                self.emit(events);
                Err(e)
            }
        }
    }

    async fn load(&self, ctx: &DocumentContext, generation: u64) -> Result<Loaded> {
        if !ctx.share.is_local()
            && let Some(batch) = self.backups.find(&ctx.id)?
        {
            log::info!(
                "[SyncCoordinator] Replaying {} backed-up deltas for {}",
                batch.len(),
                ctx.id
            );
            self.protective_snapshot(&ctx.id).await;
            self.push(ctx, &batch).await?;
            self.backups.delete(&ctx.id)?;
            self.advance_replica(&ctx.id, &batch);
            self.emit(vec![Self::notice(
                NoticeLevel::Success,
                "Blocks synced",
                "Changes saved on this device while offline or after an error were synced.",
            )]);
        }

        let server = self.remote.fetch_blocks(ctx).await?;
        if !self.is_current(generation) {
            return Ok(Loaded {
                initial: server.clone(),
                baseline: server,
                push_error: None,
            });
        }

        let replica = CollabDoc::load(self.store.as_ref(), &ctx.id)?.blocks();
        let synced = self.store.load_synced_ids(&ctx.id).unwrap_or_else(|e| {
            log::warn!("[SyncCoordinator] Ignoring unreadable synced ids: {}", e);
            LastSyncedIds::new()
        });

        if !should_merge(&server, &replica, &synced) {
            self.write_replica(&ctx.id, &server);
            return Ok(Loaded {
                initial: server.clone(),
                baseline: server,
                push_error: None,
            });
        }

        log::info!(
            "[SyncCoordinator] Local copy of {} diverged from server, merging",
            ctx.id
        );
        self.protective_snapshot(&ctx.id).await;
        let merged = merge_blocks(&server, &replica, &synced);
        self.write_replica(&ctx.id, &merged);

        let deltas = diff_blocks(&server, &merged);
        if deltas.is_empty() {
            return Ok(Loaded {
                initial: merged.clone(),
                baseline: merged,
                push_error: None,
            });
        }

        match self.push(ctx, &deltas).await {
            Ok(()) => {
                let baseline = acknowledged(&server, &deltas, &merged);
                self.write_replica(&ctx.id, &baseline);
                Ok(Loaded {
                    initial: merged,
                    baseline,
                    push_error: None,
                })
            }
            Err(e) => {
                log::warn!("[SyncCoordinator] Failed to push merge result: {}", e);
                if !ctx.share.is_local() {
                    self.backups.save(&ctx.id, &deltas)?;
                }
                // the server still holds its own copy
                Ok(Loaded {
                    initial: merged,
                    baseline: server,
                    push_error: Some(e),
                })
            }
        }
    }

    async fn autosave_snapshot(&self, document_id: &str) {
        match self
            .snapshots
            .create_snapshot(document_id, SnapshotReason::Autosave)
            .await
        {
            Ok(snapshot) => log::debug!(
                "[SyncCoordinator] Autosave snapshot {} of {}",
                snapshot.id,
                document_id
            ),
            Err(e) => log::warn!("[SyncCoordinator] Autosave snapshot failed: {}", e),
        }
    }

    async fn protective_snapshot(&self, document_id: &str) {
        match self
            .snapshots
            .create_snapshot(document_id, SnapshotReason::Merge)
            .await
        {
            Ok(snapshot) => log::debug!(
                "[SyncCoordinator] Snapshot {} taken before merge",
                snapshot.id
            ),
            Err(e) => log::warn!("[SyncCoordinator] Snapshot before merge failed: {}", e),
        }
    }

    /// Send deltas, in one request for local documents and in chunks
    /// otherwise.
    async fn push(&self, ctx: &DocumentContext, deltas: &[DeltaBlock]) -> Result<()> {
        if ctx.share.is_local() {
            self.remote.sync_deltas(ctx, deltas).await?;
            return Ok(());
        }
        for chunk in deltas.chunks(self.config.chunk_size.max(1)) {
            if let Some(blocks) = self.remote.sync_deltas(ctx, chunk).await? {
                log::debug!(
                    "[SyncCoordinator] Server now holds {} blocks for {}",
                    blocks.len(),
                    ctx.id
                );
            }
        }
        Ok(())
    }

    fn write_replica(&self, document_id: &str, blocks: &[Block]) {
        let result = CollabDoc::load(self.store.as_ref(), document_id).and_then(|doc| {
            doc.replace_blocks(blocks)?;
            doc.save(self.store.as_ref(), document_id)
        });
        if let Err(e) = result {
            log::warn!("[SyncCoordinator] Failed to update local replica: {}", e);
        }
    }

    /// Move the replica and synced ids forward by deltas the server
    /// accepted outside of a debounced save.
    fn advance_replica(&self, document_id: &str, deltas: &[DeltaBlock]) {
        let replica = match CollabDoc::load(self.store.as_ref(), document_id) {
            Ok(doc) => doc.blocks(),
            Err(e) => {
                log::warn!("[SyncCoordinator] Failed to read local replica: {}", e);
                return;
            }
        };
        match apply_deltas(replica, deltas) {
            Ok(blocks) => {
                self.write_replica(document_id, &blocks);
                if let Err(e) = self
                    .store
                    .save_synced_ids(document_id, &LastSyncedIds::from_blocks(&blocks))
                {
                    log::warn!("[SyncCoordinator] Failed to persist synced ids: {}", e);
                }
            }
            Err(e) => log::warn!("[SyncCoordinator] Replayed deltas do not apply: {}", e),
        }
    }

    /// Debounced save entry point.
    async fn save(&self, blocks: Vec<Block>) {
        let mut events = Vec::new();
        let (ctx, baseline, generation) = {
            let mut shared = self.lock();
            let Some(ctx) = shared.context.clone() else {
                return;
            };
            if !ctx.can_edit {
                return;
            }
            if shared.machine.state() == SyncState::Syncing {
                log::debug!("[SyncCoordinator] Request in flight, deferring save");
                shared.deferred = Some(blocks);
                return;
            }
            let Some(baseline) = shared.baseline.clone() else {
                return;
            };
            if shared.machine.state() != SyncState::Waiting {
                Self::transition(&mut shared, SyncTrigger::Edit, &mut events);
            }
            Self::transition(&mut shared, SyncTrigger::Fire, &mut events);
            shared.saving = true;
            (ctx, baseline, shared.generation)
        };
        self.emit(events);

        let deltas = diff_blocks(&baseline, &blocks);
        let local = ctx.share.is_local();

        if !local && !self.connectivity.is_online() {
            let mut events = Vec::new();
            if !deltas.is_empty() {
                match self.backups.save(&ctx.id, &deltas) {
                    Ok(()) => events.push(Self::notice(
                        NoticeLevel::Info,
                        "Saved offline",
                        "Changes are stored on this device and will sync once online.",
                    )),
                    Err(e) => log::error!("[SyncCoordinator] Failed to write backup: {}", e),
                }
            }
            Self::transition(&mut self.lock(), SyncTrigger::Park, &mut events);
            self.emit(events);
            self.finish_save().await;
            return;
        }

        if deltas.is_empty() {
            let mut events = Vec::new();
            Self::transition(&mut self.lock(), SyncTrigger::Succeeded, &mut events);
            self.emit(events);
            self.finish_save().await;
            return;
        }

        log::debug!(
            "[SyncCoordinator] Sending {} deltas for {}",
            deltas.len(),
            ctx.id
        );
        let result = self.push(&ctx, &deltas).await;

        if !self.is_current(generation) {
            log::debug!(
                "[SyncCoordinator] Discarding late response for {} ({} deltas)",
                ctx.id,
                deltas.len()
            );
            return;
        }

        let mut events = Vec::new();
        match result {
            Ok(()) => {
                let acknowledged = acknowledged(&baseline, &deltas, &blocks);
                if let Err(e) = self
                    .store
                    .save_synced_ids(&ctx.id, &LastSyncedIds::from_blocks(&acknowledged))
                {
                    log::warn!("[SyncCoordinator] Failed to persist synced ids: {}", e);
                }
                self.write_replica(&ctx.id, &acknowledged);
                if !local && let Err(e) = self.backups.delete(&ctx.id) {
                    log::warn!("[SyncCoordinator] Failed to clear backup: {}", e);
                }

                let block_count = acknowledged.len();
                let mut shared = self.lock();
                shared.baseline = Some(acknowledged);
                Self::transition(&mut shared, SyncTrigger::Succeeded, &mut events);
                events.push(SyncEvent::BaselineAdvanced {
                    document_id: ctx.id.clone(),
                    block_count,
                });
            }
            Err(e) => {
                Self::transition(&mut self.lock(), SyncTrigger::Failed, &mut events);
                events.push(save_failure_notice(&ctx.id, &e));
                if !local && let Err(e) = self.backups.save(&ctx.id, &deltas) {
                    log::error!("[SyncCoordinator] Failed to write backup: {}", e);
                }
            }
        }
        self.emit(events);
        self.finish_save().await;
    }

    /// The save's request settled: run a re-initialization that was asked
    /// for meanwhile, or re-schedule a deferred save.
    async fn finish_save(&self) {
        let reinit = {
            let mut shared = self.lock();
            shared.saving = false;
            if std::mem::take(&mut shared.reinit_pending) {
                shared.context.clone()
            } else {
                None
            }
        };
        match reinit {
            Some(ctx) if ctx.share.is_local() || self.connectivity.is_online() => {
                log::info!("[SyncCoordinator] Re-initializing {} after save", ctx.id);
                // a successful load re-schedules the deferred save itself
                if self.initialize(ctx).await.is_err() {
                    self.settle();
                }
            }
            _ => self.settle(),
        }
    }

    /// Re-schedule a save deferred while a request was in flight.
    fn settle(&self) {
        let mut events = Vec::new();
        let deferred = {
            let mut shared = self.lock();
            let deferred = shared.deferred.take();
            if deferred.is_some() {
                Self::transition(&mut shared, SyncTrigger::Edit, &mut events);
            }
            deferred
        };
        self.emit(events);
        if let Some(blocks) = deferred {
            self.debouncer.call(blocks);
        }
    }
}

/// What the server holds after accepting `deltas` on top of `base`.
///
/// Blocks the deltas touched carry the delta date, like the server stamps
/// them. Falls back to `fallback` when the deltas do not apply.
fn acknowledged(base: &[Block], deltas: &[DeltaBlock], fallback: &[Block]) -> Vec<Block> {
    apply_deltas(base.to_vec(), deltas).unwrap_or_else(|e| {
        log::warn!("[SyncCoordinator] Sent deltas do not apply to the baseline: {}", e);
        fallback.to_vec()
    })
}

fn save_failure_notice(document_id: &str, err: &FolioError) -> SyncEvent {
    if err.is_transient() {
        log::warn!("[SyncCoordinator] Failed to save {}: {}", document_id, err);
        Inner::notice(
            NoticeLevel::Error,
            "Failed to save blocks",
            "Changes could not be saved to the server. They are kept on this device.",
        )
    } else {
        log::error!("[SyncCoordinator] Server rejected changes to {}: {}", document_id, err);
        Inner::notice(
            NoticeLevel::Error,
            "Failed to save blocks",
            "The server rejected the changes. They are kept on this device.",
        )
    }
}
