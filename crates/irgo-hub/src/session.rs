//! Virtual WebSocket sessions.
//!
//! Each channel opened by the WebView creates one [`Session`]. The session
//! owns a bounded outbound queue drained by the bridge side, a metadata map,
//! and a table of pending requests awaiting correlated replies.

use crate::message::{parse_request, WsEnvelope, WsRequest};
use async_trait::async_trait;
use irgo_core::{IrgoError, IrgoResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default outbound queue capacity when the hub is not configured otherwise.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Processes messages for sessions connected to one URL pattern.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Called when a connection is established. Returning an error rejects
    /// the connection and the session is discarded.
    async fn on_connect(&self, session: &Arc<Session>) -> IrgoResult<()> {
        let _ = session;
        Ok(())
    }

    /// Called for each inbound message. The returned envelope, if any, is the
    /// direct response to this message.
    async fn on_message(
        &self,
        session: &Arc<Session>,
        request: WsRequest,
    ) -> IrgoResult<Option<WsEnvelope>>;

    /// Called exactly once when the session closes.
    async fn on_close(&self, session: &Arc<Session>) {
        let _ = session;
    }
}

/// Adapts a plain closure into a [`MessageHandler`] with default connect and
/// close behavior.
pub struct MessageHandlerFn<F>(pub F);

#[async_trait]
impl<F> MessageHandler for MessageHandlerFn<F>
where
    F: Fn(&Arc<Session>, WsRequest) -> IrgoResult<Option<WsEnvelope>> + Send + Sync,
{
    async fn on_message(
        &self,
        session: &Arc<Session>,
        request: WsRequest,
    ) -> IrgoResult<Option<WsEnvelope>> {
        (self.0)(session, request)
    }
}

/// An inbound request tracked until a reply retires it.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request: WsRequest,
    pub received_at: Instant,
}

/// One virtual WebSocket connection.
///
/// The send queue, metadata map, and pending table are guarded independently,
/// so metadata access never contends with sends. No lock is held while a
/// handler callback runs.
pub struct Session {
    id: String,
    url: String,
    created_at: SystemTime,
    handler: Arc<dyn MessageHandler>,
    // Self-reference so handler callbacks receive the shared handle.
    this: Weak<Session>,

    // Sender slot doubles as the close latch: `None` after close, which drops
    // the sender and lets a drainer consume buffered envelopes then terminate.
    outbound_tx: RwLock<Option<mpsc::Sender<WsEnvelope>>>,
    outbound_rx: tokio::sync::Mutex<Option<mpsc::Receiver<WsEnvelope>>>,

    pending: RwLock<HashMap<String, PendingRequest>>,
    metadata: RwLock<HashMap<String, Value>>,
    done: CancellationToken,
}

impl Session {
    /// Create a session with the given outbound queue capacity.
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
        queue_capacity: usize,
    ) -> Arc<Self> {
        let capacity = if queue_capacity == 0 {
            DEFAULT_QUEUE_CAPACITY
        } else {
            queue_capacity
        };
        let (tx, rx) = mpsc::channel(capacity);
        let id = id.into();
        let url = url.into();
        Arc::new_cyclic(|this| Self {
            id,
            url,
            created_at: SystemTime::now(),
            handler,
            this: this.clone(),
            outbound_tx: RwLock::new(Some(tx)),
            outbound_rx: tokio::sync::Mutex::new(Some(rx)),
            pending: RwLock::new(HashMap::new()),
            metadata: RwLock::new(HashMap::new()),
            done: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Queue an envelope for the client. Returns `false` when the session is
    /// closed or the queue is full; never blocks.
    pub fn send(&self, envelope: WsEnvelope) -> bool {
        let guard = self.outbound_tx.read().unwrap();
        match guard.as_ref() {
            Some(tx) => tx.try_send(envelope).is_ok(),
            None => false,
        }
    }

    /// Queue an HTML fragment aimed at a target element.
    pub fn send_html(&self, target: impl Into<String>, html: impl Into<String>) -> bool {
        self.send(WsEnvelope::html(target, html))
    }

    /// Send a reply correlated with a tracked request. The pending entry is
    /// cleared before the reply is queued, so an observer that sees the entry
    /// gone may still be ahead of the client seeing the frame.
    pub fn reply(&self, request_id: &str, html: impl Into<String>) -> bool {
        self.clear_pending(request_id);
        self.send(WsEnvelope::reply(request_id, html))
    }

    /// Process one inbound frame: parse, track its `request_id` when present,
    /// and hand it to the handler.
    pub async fn handle_message(&self, data: &[u8]) -> IrgoResult<Option<WsEnvelope>> {
        if self.is_closed() {
            return Err(IrgoError::SessionClosed);
        }

        let request = parse_request(data)?;
        if !request.request_id.is_empty() {
            self.track_pending(&request);
        }

        let this = self.this.upgrade().ok_or(IrgoError::SessionClosed)?;
        self.handler.on_message(&this, request).await
    }

    /// Close the session. Idempotent: the queue sender is dropped once, the
    /// done latch cancelled once, and `on_close` invoked once.
    pub async fn close(&self) {
        let taken = self.outbound_tx.write().unwrap().take();
        if taken.is_none() {
            return;
        }
        drop(taken);

        self.done.cancel();
        debug!(session_id = %self.id, "session closed");
        if let Some(this) = self.this.upgrade() {
            self.handler.on_close(&this).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.outbound_tx.read().unwrap().is_none()
    }

    /// A latch that trips when the session closes. Clone-cheap and
    /// select-friendly.
    pub fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Receive the next outbound envelope. Single-reader FIFO: after close,
    /// already-queued envelopes drain first, then `None`.
    pub async fn recv_outbound(&self) -> Option<WsEnvelope> {
        let mut guard = self.outbound_rx.lock().await;
        guard.as_mut()?.recv().await
    }

    /// Store a metadata value. Last writer wins per key.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.write().unwrap().insert(key.into(), value.into());
    }

    /// Fetch a metadata value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.metadata.read().unwrap().get(key).cloned()
    }

    /// Fetch a metadata value as a string.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key)
            .and_then(|v| v.as_str().map(|s| s.to_string()))
    }

    /// Fetch a metadata value as an integer.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    /// Remove a metadata value.
    pub fn delete(&self, key: &str) {
        self.metadata.write().unwrap().remove(key);
    }

    /// Fetch a tracked request by its correlation id.
    pub fn get_pending_request(&self, request_id: &str) -> Option<WsRequest> {
        self.pending
            .read()
            .unwrap()
            .get(request_id)
            .map(|p| p.request.clone())
    }

    /// Drop pending entries older than `ttl`.
    pub fn cleanup_expired_pending(&self, ttl: Duration) {
        self.pending
            .write()
            .unwrap()
            .retain(|_, p| p.received_at.elapsed() <= ttl);
    }

    fn track_pending(&self, request: &WsRequest) {
        self.pending.write().unwrap().insert(
            request.request_id.clone(),
            PendingRequest {
                request: request.clone(),
                received_at: Instant::now(),
            },
        );
    }

    fn clear_pending(&self, request_id: &str) {
        self.pending.write().unwrap().remove(request_id);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        closes: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for CountingHandler {
        async fn on_message(
            &self,
            _session: &Arc<Session>,
            request: WsRequest,
        ) -> IrgoResult<Option<WsEnvelope>> {
            Ok(Some(WsEnvelope::html("#echo", request.payload_str())))
        }

        async fn on_close(&self, _session: &Arc<Session>) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_session(capacity: usize) -> (Arc<Session>, Arc<CountingHandler>) {
        let handler = Arc::new(CountingHandler {
            closes: AtomicUsize::new(0),
        });
        let session = Session::new("s1", "/ws/chat", handler.clone(), capacity);
        (session, handler)
    }

    #[tokio::test]
    async fn send_preserves_fifo_order() {
        let (session, _) = counting_session(10);
        for i in 0..3 {
            assert!(session.send(WsEnvelope::html("#t", format!("m{i}"))));
        }
        for i in 0..3 {
            let env = session.recv_outbound().await.unwrap();
            assert_eq!(env.payload_str(), format!("m{i}"));
        }
    }

    #[tokio::test]
    async fn send_drops_on_full_queue() {
        let (session, _) = counting_session(2);
        assert!(session.send(WsEnvelope::html("#t", "a")));
        assert!(session.send(WsEnvelope::html("#t", "b")));
        assert!(!session.send(WsEnvelope::html("#t", "c")));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_further_use() {
        let (session, handler) = counting_session(10);
        session.close().await;
        session.close().await;
        session.close().await;

        assert_eq!(handler.closes.load(Ordering::SeqCst), 1);
        assert!(session.is_closed());
        assert!(!session.send(WsEnvelope::html("#t", "late")));
        assert!(matches!(
            session.handle_message(b"{}").await,
            Err(IrgoError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn recv_drains_buffered_envelopes_after_close() {
        let (session, _) = counting_session(10);
        session.send(WsEnvelope::html("#t", "one"));
        session.send(WsEnvelope::html("#t", "two"));
        session.close().await;

        assert_eq!(session.recv_outbound().await.unwrap().payload_str(), "one");
        assert_eq!(session.recv_outbound().await.unwrap().payload_str(), "two");
        assert!(session.recv_outbound().await.is_none());
    }

    #[tokio::test]
    async fn done_latch_trips_on_close() {
        let (session, _) = counting_session(10);
        let done = session.done();
        assert!(!done.is_cancelled());
        session.close().await;
        done.cancelled().await;
    }

    #[tokio::test]
    async fn handle_message_tracks_and_reply_clears_pending() {
        let (session, _) = counting_session(10);
        let frame = br#"{"type":"submit","request_id":"r1","payload":"hi"}"#;
        let response = session.handle_message(frame).await.unwrap().unwrap();
        assert_eq!(response.payload_str(), "hi");

        let pending = session.get_pending_request("r1").unwrap();
        assert_eq!(pending.payload_str(), "hi");

        assert!(session.reply("r1", "<b>done</b>"));
        assert!(session.get_pending_request("r1").is_none());

        // The echo response from on_message was not queued; only the reply is.
        let queued = session.recv_outbound().await.unwrap();
        assert_eq!(queued.request_id, "r1");
    }

    #[tokio::test]
    async fn cleanup_expired_pending_sweeps_old_entries() {
        let (session, _) = counting_session(10);
        session
            .handle_message(br#"{"request_id":"r1"}"#)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        session.cleanup_expired_pending(Duration::from_millis(1));
        assert!(session.get_pending_request("r1").is_none());
    }

    #[tokio::test]
    async fn metadata_is_independent_per_key() {
        let (session, _) = counting_session(10);
        session.set("user", "alice");
        session.set("count", 41);
        session.set("count", 42);

        assert_eq!(session.get_str("user").as_deref(), Some("alice"));
        assert_eq!(session.get_i64("count"), Some(42));
        assert_eq!(session.get_str("count"), None);

        session.delete("user");
        assert!(session.get("user").is_none());
    }

    #[tokio::test]
    async fn malformed_frame_is_rejected() {
        let (session, _) = counting_session(10);
        assert!(matches!(
            session.handle_message(b"not json").await,
            Err(IrgoError::Malformed(_))
        ));
    }
}
