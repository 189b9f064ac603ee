//! WebSocket transport for the realtime channel.
//!
//! A background task owns the socket. It reconnects with exponential backoff
//! (1s, 2s, 4s, ... capped at 32s) and reports lifecycle changes and text
//! frames as [`TransportEvent`]s.
//!
//! The transport reports itself connected only once the channel has sent its
//! `join` on the current session, so nothing reaches the server ahead of the
//! join. Frames that were accepted but never written when a session dies are
//! written again after the next join.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::protocol::ClientMessage;
use super::transport::{CollabTransport, TransportEvent};
use crate::error::{FolioError, Result};

const MAX_BACKOFF_MS: u64 = 32_000;

/// Reconnect delay for the given attempt, starting at 1.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    Duration::from_millis((1000u64 << exp).min(MAX_BACKOFF_MS))
}

pub struct WebSocketTransport {
    outgoing: mpsc::UnboundedSender<String>,
    /// A session is open.
    session_up: Arc<AtomicBool>,
    /// The channel's join went out on the open session.
    joined: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    /// Start connecting to `server_url`.
    ///
    /// The auth token, if any, travels as the `token` query parameter.
    pub fn connect(
        server_url: &str,
        auth_token: Option<&str>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>)> {
        let mut url = Url::parse(server_url)
            .map_err(|e| FolioError::Transport(format!("Invalid URL {}: {}", server_url, e)))?;
        if let Some(token) = auth_token {
            url.query_pairs_mut().append_pair("token", token);
        }

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session_up = Arc::new(AtomicBool::new(false));
        let joined = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));

        log::info!("[SyncTransport] Connecting to {}", server_url);
        let handle = tokio::spawn(run_loop(
            url.to_string(),
            outgoing_rx,
            events_tx,
            Session {
                up: Arc::clone(&session_up),
                joined: Arc::clone(&joined),
            },
            Arc::clone(&running),
        ));

        let transport = Arc::new(Self {
            outgoing: outgoing_tx,
            session_up,
            joined,
            running,
            task: Mutex::new(Some(handle)),
        });
        Ok((transport, events_rx))
    }

    /// Stop reconnecting and close the socket.
    pub fn shutdown(&self) {
        log::info!("[SyncTransport] Disconnecting");
        self.running.store(false, Ordering::Relaxed);
        self.session_up.store(false, Ordering::SeqCst);
        self.joined.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl CollabTransport for WebSocketTransport {
    fn send(&self, message: ClientMessage) -> Result<()> {
        if !self.session_up.load(Ordering::SeqCst) {
            return Err(FolioError::Transport("not connected".to_string()));
        }
        let is_join = matches!(message, ClientMessage::Join { .. });
        if !is_join && !self.joined.load(Ordering::SeqCst) {
            return Err(FolioError::Transport("document not joined yet".to_string()));
        }
        let text = message.to_json()?;
        self.outgoing
            .send(text)
            .map_err(|_| FolioError::Transport("transport task has stopped".to_string()))?;
        if is_join {
            self.joined.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session_up.load(Ordering::SeqCst) && self.joined.load(Ordering::SeqCst)
    }
}

/// Connection flags shared between the transport handle and its task.
struct Session {
    up: Arc<AtomicBool>,
    joined: Arc<AtomicBool>,
}

impl Session {
    fn open(&self) {
        self.joined.store(false, Ordering::SeqCst);
        self.up.store(true, Ordering::SeqCst);
    }

    fn close(&self) {
        self.up.store(false, Ordering::SeqCst);
        self.joined.store(false, Ordering::SeqCst);
    }
}

async fn run_loop(
    url: String,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
    session: Session,
    running: Arc<AtomicBool>,
) {
    let mut attempts: u32 = 0;
    // accepted by `send` but never written on the previous session
    let mut unsent: Vec<String> = Vec::new();

    while running.load(Ordering::Relaxed) {
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                log::info!("[SyncTransport] Connected");
                attempts = 0;

                // frames from before the last drop, oldest first; written
                // after the join so the server has a room for them
                let mut held = std::mem::take(&mut unsent);
                while let Ok(text) = outgoing.try_recv() {
                    held.push(text);
                }

                session.open();
                if events.send(TransportEvent::Connected).is_err() {
                    break;
                }

                let (reason, dropped) = run_session(stream, &mut outgoing, &events, held).await;
                session.close();
                if !dropped.is_empty() {
                    log::info!(
                        "[SyncTransport] Keeping {} unsent frames for the next session",
                        dropped.len()
                    );
                }
                unsent = dropped;
                log::info!("[SyncTransport] Connection ended: {}", reason);
                if events.send(TransportEvent::Disconnected).is_err() {
                    break;
                }
            }
            Err(e) => {
                log::error!("[SyncTransport] Connection failed: {}", e);
            }
        }

        if !running.load(Ordering::Relaxed) {
            break;
        }

        attempts += 1;
        let delay = backoff_delay(attempts);
        log::info!(
            "[SyncTransport] Reconnecting in {}ms (attempt {})",
            delay.as_millis(),
            attempts
        );
        tokio::time::sleep(delay).await;
    }

    log::info!("[SyncTransport] Sync loop ended");
}

/// Pump one session. Returns why it ended and the frames that were taken off
/// the queue but not written.
async fn run_session<S>(
    stream: tokio_tungstenite::WebSocketStream<S>,
    outgoing: &mut mpsc::UnboundedReceiver<String>,
    events: &mpsc::UnboundedSender<TransportEvent>,
    mut held: Vec<String>,
) -> (&'static str, Vec<String>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if events.send(TransportEvent::Message(text.to_string())).is_err() {
                            return ("channel_closed", held);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            log::error!("[SyncTransport] Failed to answer ping: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(_))) => return ("closed", held),
                    Some(Err(e)) => {
                        log::error!("[SyncTransport] WebSocket error: {}", e);
                        return ("error", held);
                    }
                    None => return ("ended", held),
                    _ => {}
                }
            }
            outgoing_msg = outgoing.recv() => {
                let Some(text) = outgoing_msg else {
                    return ("channel_closed", held);
                };
                // the first frame of a session is the join
                let mut batch = vec![text];
                batch.append(&mut held);
                if let Err(unsent) = send_batch(&mut write, batch).await {
                    return ("error", unsent);
                }
            }
        }
    }
}

/// Write `batch` in order. On failure, returns the failed frame and
/// everything after it.
async fn send_batch<W>(write: &mut W, batch: Vec<String>) -> std::result::Result<(), Vec<String>>
where
    W: Sink<Message> + Unpin,
    W::Error: std::fmt::Display,
{
    let mut frames = batch.into_iter();
    while let Some(text) = frames.next() {
        if let Err(e) = write.send(Message::Text(text.clone().into())).await {
            log::error!("[SyncTransport] Failed to send: {}", e);
            let mut unsent = vec![text];
            unsent.extend(frames);
            return Err(unsent);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        let delays: Vec<u128> = (1..=8).map(|a| backoff_delay(a).as_millis()).collect();
        assert_eq!(
            delays,
            vec![1000, 2000, 4000, 8000, 16000, 32000, 32000, 32000]
        );
        assert_eq!(backoff_delay(1000).as_millis(), 32000);
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        assert!(WebSocketTransport::connect("not a url", None).is_err());
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let (transport, _events) =
            WebSocketTransport::connect("ws://127.0.0.1:9/collab", Some("t")).unwrap();
        assert!(!transport.is_connected());
        assert!(transport.send(ClientMessage::join("doc-1")).is_err());
        transport.shutdown();
    }

    #[tokio::test]
    async fn test_failed_write_returns_the_rest_of_the_batch() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&written);
        let sink = futures_util::sink::unfold(0usize, move |count, msg: Message| {
            let log = Arc::clone(&log);
            async move {
                if count == 1 {
                    return Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed);
                }
                log.lock().unwrap().push(msg.into_text().unwrap().as_str().to_string());
                Ok(count + 1)
            }
        });
        let mut sink = Box::pin(sink);

        let batch = vec!["join".to_string(), "a".to_string(), "b".to_string()];
        let result = send_batch(&mut sink, batch).await;

        assert_eq!(result, Err(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(*written.lock().unwrap(), vec!["join".to_string()]);
    }

    #[tokio::test]
    async fn test_frames_wait_for_the_join() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            let mut frames = Vec::new();
            while frames.len() < 2 {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => frames.push(text.as_str().to_string()),
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
            frames
        });

        let (transport, mut events) =
            WebSocketTransport::connect(&format!("ws://{addr}/collab"), None).unwrap();
        assert!(matches!(events.recv().await, Some(TransportEvent::Connected)));

        // session is up but the document is not joined yet
        assert!(!transport.is_connected());
        assert!(transport.send(ClientMessage::sync("doc-1", b"early")).is_err());

        transport.send(ClientMessage::join("doc-1")).unwrap();
        assert!(transport.is_connected());
        transport.send(ClientMessage::sync("doc-1", b"update")).unwrap();

        let frames = server.await.unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains(r#""event":"join""#));
        assert!(frames[1].contains(r#""event":"sync""#));
        transport.shutdown();
    }
}
