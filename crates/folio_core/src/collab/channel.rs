//! Realtime collaboration channel for one document.
//!
//! Local mutations of the [`CollabDoc`] surface as yrs updates. They are
//! coalesced (trailing window with a max-wait bound), merged into a single
//! update and sent as a `sync` message. While the transport is down, merged
//! updates queue up and are flushed in order on reconnect, before the
//! state-vector `diff` request.
//!
//! Remote updates are applied straight to the doc and reported to block
//! observers as a flattened block array, which is what feeds REST autosave.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::doc::CollabDoc;
use super::protocol::{ClientMessage, ServerMessage};
use super::transport::{CollabTransport, TransportEvent};
use crate::block::Block;
use crate::config::CollabConfig;
use crate::error::{FolioError, Result};
use crate::store::LocalStore;
use crate::sync::{DebounceConfig, Debouncer, SyncCoordinator};

/// Callback receiving the flattened block array after a change.
pub type BlocksObserver = Arc<dyn Fn(&[Block]) + Send + Sync>;

struct ChannelInner {
    document_id: String,
    doc: CollabDoc,
    transport: Arc<dyn CollabTransport>,
    store: Option<Arc<dyn LocalStore>>,
    /// Merged updates waiting for a connection, oldest first.
    queue: Mutex<VecDeque<Vec<u8>>>,
    outbound: Debouncer<Vec<u8>>,
    observers: Mutex<Vec<BlocksObserver>>,
    subscription: Mutex<Option<yrs::Subscription>>,
}

/// Live collaboration on one document.
///
/// Must be created and used inside a tokio runtime.
#[derive(Clone)]
pub struct RealtimeCollabChannel {
    inner: Arc<ChannelInner>,
}

impl RealtimeCollabChannel {
    /// Wrap `doc` and start capturing its local updates.
    pub fn new(
        document_id: impl Into<String>,
        doc: CollabDoc,
        transport: Arc<dyn CollabTransport>,
        config: DebounceConfig,
    ) -> Result<Self> {
        Self::build(document_id.into(), doc, transport, None, config)
    }

    /// Like [`new`](Self::new), with the outbound window from the `[collab]`
    /// config section.
    pub fn from_config(
        document_id: impl Into<String>,
        doc: CollabDoc,
        transport: Arc<dyn CollabTransport>,
        config: &CollabConfig,
    ) -> Result<Self> {
        Self::new(document_id, doc, transport, config.debounce())
    }

    /// Like [`new`](Self::new), persisting the doc as the document's replica
    /// after every change.
    pub fn with_store(
        document_id: impl Into<String>,
        doc: CollabDoc,
        transport: Arc<dyn CollabTransport>,
        store: Arc<dyn LocalStore>,
        config: DebounceConfig,
    ) -> Result<Self> {
        Self::build(document_id.into(), doc, transport, Some(store), config)
    }

    fn build(
        document_id: String,
        doc: CollabDoc,
        transport: Arc<dyn CollabTransport>,
        store: Option<Arc<dyn LocalStore>>,
        config: DebounceConfig,
    ) -> Result<Self> {
        let inner = Arc::new_cyclic(|weak: &Weak<ChannelInner>| {
            let weak = weak.clone();
            let outbound = Debouncer::new(config, move |batch: Vec<Vec<u8>>| {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.flush_local(batch);
                    }
                })
            });
            ChannelInner {
                document_id,
                doc,
                transport,
                store,
                queue: Mutex::new(VecDeque::new()),
                outbound,
                observers: Mutex::new(Vec::new()),
                subscription: Mutex::new(None),
            }
        });

        let weak = Arc::downgrade(&inner);
        let subscription = inner.doc.observe_local_updates(move |update| {
            if let Some(inner) = weak.upgrade() {
                inner.outbound.call(update.to_vec());
            }
        })?;
        *inner.lock_subscription() = Some(subscription);

        Ok(Self { inner })
    }

    pub fn document_id(&self) -> &str {
        &self.inner.document_id
    }

    /// The collaborative doc. The editor binding mutates it directly.
    pub fn doc(&self) -> &CollabDoc {
        &self.inner.doc
    }

    /// Flattened, order-sorted blocks.
    pub fn blocks(&self) -> Vec<Block> {
        self.inner.doc.blocks()
    }

    /// Make the doc hold `blocks`; the resulting update is sent like any
    /// other local edit.
    pub fn apply_local_update(&self, blocks: &[Block]) -> Result<()> {
        self.inner.doc.replace_blocks(blocks)
    }

    /// Register a block observer, called after local flushes and remote
    /// updates.
    pub fn subscribe_blocks<F>(&self, observer: F)
    where
        F: Fn(&[Block]) + Send + Sync + 'static,
    {
        self.inner
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(observer));
    }

    /// Hand every block change, local or remote, to `coordinator` as an
    /// editor update, so it reaches the block endpoint through the debounced
    /// delta save.
    pub fn forward_to(&self, coordinator: &SyncCoordinator) {
        let coordinator = coordinator.clone();
        self.subscribe_blocks(move |blocks| coordinator.on_doc_update(blocks));
    }

    /// Number of merged updates waiting for a connection.
    pub fn queued(&self) -> usize {
        self.inner.lock_queue().len()
    }

    /// Send pending local updates now instead of waiting for the window.
    pub async fn flush(&self) {
        self.inner.outbound.flush().await;
    }

    /// Transport came up: join, drain the queue in order, then request the
    /// diff against our state vector.
    pub fn handle_connected(&self) -> Result<()> {
        let inner = &self.inner;
        log::info!("[Collab] Connected, joining {}", inner.document_id);
        inner
            .transport
            .send(ClientMessage::join(&inner.document_id))?;

        {
            let mut queue = inner.lock_queue();
            if !queue.is_empty() {
                log::info!("[Collab] Flushing {} queued updates", queue.len());
            }
            while let Some(update) = queue.pop_front() {
                if let Err(e) = inner
                    .transport
                    .send(ClientMessage::sync(&inner.document_id, &update))
                {
                    queue.push_front(update);
                    return Err(e);
                }
            }
        }

        inner.transport.send(ClientMessage::diff(
            &inner.document_id,
            &inner.doc.encode_state_vector(),
        ))
    }

    pub fn handle_disconnected(&self) {
        log::info!(
            "[Collab] Disconnected from {}, queueing local updates",
            self.inner.document_id
        );
    }

    /// Apply a text frame from the server.
    pub fn handle_server_message(&self, text: &str) -> Result<()> {
        let message = ServerMessage::parse(text)?;
        if let Some(target) = message.document_id()
            && target != self.inner.document_id
        {
            log::debug!("[Collab] Ignoring message for {}", target);
            return Ok(());
        }
        let update = message.update_bytes()?;
        self.on_remote_update(&update)
    }

    /// Apply an update that came from another client.
    ///
    /// Not echoed back to the server.
    pub fn on_remote_update(&self, update: &[u8]) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        self.inner.doc.apply_update(update)?;
        self.inner.after_change();
        Ok(())
    }

    /// Dispatch one transport event, logging failures.
    pub fn handle_event(&self, event: TransportEvent) {
        let result = match event {
            TransportEvent::Connected => self.handle_connected(),
            TransportEvent::Disconnected => {
                self.handle_disconnected();
                Ok(())
            }
            TransportEvent::Message(text) => self.handle_server_message(&text),
        };
        if let Err(e) = result {
            log::warn!("[Collab] {}", e);
        }
    }

    /// Spawn a task feeding transport events into this channel until the
    /// sender side closes.
    pub fn drive(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) -> JoinHandle<()> {
        let channel = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                channel.handle_event(event);
            }
            log::debug!("[Collab] Event stream for {} ended", channel.document_id());
        })
    }
}

impl ChannelInner {
    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_subscription(&self) -> MutexGuard<'_, Option<yrs::Subscription>> {
        self.subscription.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Merge a coalesced batch of local updates and send or queue it.
    fn flush_local(&self, batch: Vec<Vec<u8>>) {
        let merged = match merge(&batch) {
            Ok(update) => vec![update],
            Err(e) => {
                log::warn!("[Collab] {}; sending updates one by one", e);
                batch
            }
        };

        for update in merged {
            self.dispatch(update);
        }
        self.after_change();
    }

    fn dispatch(&self, update: Vec<u8>) {
        let mut queue = self.lock_queue();
        // keep order behind anything already queued
        if !queue.is_empty() || !self.transport.is_connected() {
            queue.push_back(update);
            return;
        }
        if let Err(e) = self
            .transport
            .send(ClientMessage::sync(&self.document_id, &update))
        {
            log::warn!("[Collab] Send failed, queueing: {}", e);
            queue.push_back(update);
        }
    }

    fn after_change(&self) {
        if let Some(store) = &self.store
            && let Err(e) = self.doc.save(store.as_ref(), &self.document_id)
        {
            log::warn!("[Collab] Failed to persist replica: {}", e);
        }

        let observers: Vec<BlocksObserver> = self
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if observers.is_empty() {
            return;
        }
        let blocks = self.doc.blocks();
        for observer in observers {
            observer(&blocks);
        }
    }
}

fn merge(batch: &[Vec<u8>]) -> Result<Vec<u8>> {
    if let [single] = batch {
        return Ok(single.clone());
    }
    let refs: Vec<&[u8]> = batch.iter().map(Vec::as_slice).collect();
    yrs::merge_updates_v1(&refs)
        .map_err(|e| FolioError::Crdt(format!("Failed to merge updates: {}", e)))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::collab::transport::MemoryTransport;
    use crate::store::MemoryStore;

    fn config() -> DebounceConfig {
        DebounceConfig::from_millis(1000, 3000)
    }

    fn channel(transport: &MemoryTransport) -> RealtimeCollabChannel {
        RealtimeCollabChannel::new(
            "doc-1",
            CollabDoc::new(),
            Arc::new(transport.clone()),
            config(),
        )
        .unwrap()
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    fn apply_sent(target: &CollabDoc, sent: &[ClientMessage]) {
        for message in sent {
            if let Some(update) = message.update_bytes().unwrap() {
                target.apply_update(&update).unwrap();
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_joins_then_requests_diff() {
        let transport = MemoryTransport::new();
        let channel = channel(&transport);
        transport.set_connected(true);

        channel.handle_connected().unwrap();

        let sent = transport.sent();
        assert_eq!(sent[0], ClientMessage::join("doc-1"));
        assert!(matches!(&sent[1], ClientMessage::Diff { document_id, .. } if document_id == "doc-1"));
        assert_eq!(sent.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keystrokes_are_coalesced_into_one_update() {
        let transport = MemoryTransport::new();
        transport.set_connected(true);
        let channel = channel(&transport);

        for i in 0..5 {
            channel
                .doc()
                .upsert_block(&Block::text(format!("b{i}"), i as f64, "x"))
                .unwrap();
            advance(100).await;
        }
        assert!(transport.sent().is_empty());

        advance(1000).await;
        let sent = transport.drain();
        assert_eq!(sent.len(), 1);

        let mirror = CollabDoc::new();
        apply_sent(&mirror, &sent);
        assert_eq!(mirror.blocks(), channel.blocks());
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_updates_flush_in_order_before_diff() {
        let transport = MemoryTransport::new();
        let channel = channel(&transport);

        channel
            .doc()
            .upsert_block(&Block::text("a", 0.0, "first"))
            .unwrap();
        advance(1500).await;
        channel
            .doc()
            .upsert_block(&Block::text("a", 0.0, "second"))
            .unwrap();
        advance(1500).await;

        assert_eq!(channel.queued(), 2);
        assert!(transport.sent().is_empty());

        transport.set_connected(true);
        channel.handle_connected().unwrap();

        let sent = transport.sent();
        let events: Vec<&str> = sent
            .iter()
            .map(|m| match m {
                ClientMessage::Join { .. } => "join",
                ClientMessage::Sync { .. } => "sync",
                ClientMessage::Diff { .. } => "diff",
            })
            .collect();
        assert_eq!(events, vec!["join", "sync", "sync", "diff"]);
        assert_eq!(channel.queued(), 0);

        let mirror = CollabDoc::new();
        apply_sent(&mirror, &sent);
        assert_eq!(mirror.block("a").unwrap().plain_text(), "second");
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_update_applies_without_echo() {
        let transport = MemoryTransport::new();
        transport.set_connected(true);
        let channel = channel(&transport);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        channel.subscribe_blocks(move |blocks| {
            sink.lock().unwrap().push(blocks.len());
        });

        let peer = CollabDoc::new();
        peer.replace_blocks(&[Block::text("a", 0.0, "A"), Block::text("b", 1.0, "B")])
            .unwrap();
        let frame = ServerMessage::sync(&peer.encode_state_as_update())
            .to_json()
            .unwrap();

        channel.handle_server_message(&frame).unwrap();
        advance(5000).await;

        assert_eq!(channel.blocks(), peer.blocks());
        assert_eq!(*seen.lock().unwrap(), vec![2]);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_diff_response_catches_up() {
        let transport = MemoryTransport::new();
        transport.set_connected(true);
        let channel = channel(&transport);
        channel.handle_connected().unwrap();

        let server = CollabDoc::new();
        server.upsert_block(&Block::text("s", 0.0, "from server")).unwrap();

        let sent = transport.drain();
        let ClientMessage::Diff { state_vector, .. } = &sent[1] else {
            panic!("expected diff request");
        };
        use base64::Engine as _;
        let sv = base64::engine::general_purpose::STANDARD
            .decode(state_vector)
            .unwrap();
        let reply = ServerMessage::diff(&server.encode_diff(&sv).unwrap());
        channel.handle_event(TransportEvent::Message(reply.to_json().unwrap()));

        assert_eq!(channel.blocks(), server.blocks());
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_for_other_documents_are_ignored() {
        let transport = MemoryTransport::new();
        let channel = channel(&transport);

        let peer = CollabDoc::new();
        peer.upsert_block(&Block::text("x", 0.0, "X")).unwrap();
        let frame = ServerMessage::Sync {
            document_id: Some("doc-2".into()),
            update: base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                peer.encode_state_as_update(),
            ),
        };

        channel
            .handle_server_message(&frame.to_json().unwrap())
            .unwrap();
        assert!(channel.blocks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_persist_replica() {
        let transport = MemoryTransport::new();
        let store = MemoryStore::new();
        let channel = RealtimeCollabChannel::with_store(
            "doc-1",
            CollabDoc::new(),
            Arc::new(transport.clone()),
            Arc::new(store.clone()),
            config(),
        )
        .unwrap();

        channel
            .apply_local_update(&[Block::text("a", 0.0, "A")])
            .unwrap();
        channel.flush().await;

        let replica = CollabDoc::load(&store, "doc-1").unwrap();
        assert_eq!(replica.blocks(), channel.blocks());
        assert_eq!(channel.queued(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_from_config_uses_collab_window() {
        let transport = MemoryTransport::new();
        transport.set_connected(true);
        let config = CollabConfig {
            send_interval_ms: 200,
            max_wait_ms: 400,
            ..Default::default()
        };
        let channel = RealtimeCollabChannel::from_config(
            "doc-1",
            CollabDoc::new(),
            Arc::new(transport.clone()),
            &config,
        )
        .unwrap();

        channel
            .doc()
            .upsert_block(&Block::text("a", 0.0, "A"))
            .unwrap();
        advance(150).await;
        assert!(transport.sent().is_empty());

        advance(100).await;
        assert_eq!(transport.drain().len(), 1);
    }
}
