//! Session registry and URL-pattern routing.

use crate::message::{WsEnvelope, WsRequest};
use crate::session::{MessageHandler, MessageHandlerFn, Session, DEFAULT_QUEUE_CAPACITY};
use chrono::Utc;
use irgo_core::{IrgoError, IrgoResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Callback observing session lifecycle transitions.
pub type SessionObserver = Box<dyn Fn(&Arc<Session>) + Send + Sync>;

/// Manages all virtual WebSocket sessions and routes connection URLs to
/// handlers.
///
/// Patterns are exact strings (`/ws/chat`) or prefixes ending in `/`
/// (`/ws/`). An exact match always wins; among matching prefixes the longest
/// wins. `/ws` and `/ws/` are distinct patterns, and `/ws/` matches `/ws/x`
/// but not `/ws`.
pub struct Hub {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    handlers: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
    default_handler: RwLock<Option<Arc<dyn MessageHandler>>>,
    counter: AtomicU64,
    queue_capacity: usize,

    on_session_created: RwLock<Option<SessionObserver>>,
    on_session_destroyed: RwLock<Option<SessionObserver>>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a hub whose sessions use the given outbound queue capacity.
    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            default_handler: RwLock::new(None),
            counter: AtomicU64::new(0),
            queue_capacity,
            on_session_created: RwLock::new(None),
            on_session_destroyed: RwLock::new(None),
        }
    }

    /// Register a handler for a URL pattern.
    pub fn handle<H: MessageHandler + 'static>(&self, pattern: impl Into<String>, handler: H) {
        self.handlers
            .write()
            .unwrap()
            .insert(pattern.into(), Arc::new(handler));
    }

    /// Register a closure handler for a URL pattern.
    pub fn handle_fn<F>(&self, pattern: impl Into<String>, handler: F)
    where
        F: Fn(&Arc<Session>, WsRequest) -> IrgoResult<Option<WsEnvelope>> + Send + Sync + 'static,
    {
        self.handle(pattern, MessageHandlerFn(handler));
    }

    /// Set the handler for URLs that match no registered pattern.
    pub fn set_default_handler<H: MessageHandler + 'static>(&self, handler: H) {
        *self.default_handler.write().unwrap() = Some(Arc::new(handler));
    }

    /// Observe session creation (after the handler accepted the connection).
    pub fn on_session_created(&self, observer: impl Fn(&Arc<Session>) + Send + Sync + 'static) {
        *self.on_session_created.write().unwrap() = Some(Box::new(observer));
    }

    /// Observe session destruction.
    pub fn on_session_destroyed(&self, observer: impl Fn(&Arc<Session>) + Send + Sync + 'static) {
        *self.on_session_destroyed.write().unwrap() = Some(Box::new(observer));
    }

    /// Create a session for the given URL.
    ///
    /// Fails with [`IrgoError::NoHandler`] when nothing matches and no default
    /// handler is set. The matched handler's `on_connect` may reject the
    /// connection, in which case the session is discarded and the error
    /// propagated.
    pub async fn connect(&self, url: &str) -> IrgoResult<Arc<Session>> {
        let id = self.generate_session_id();
        self.connect_session(id, url).await
    }

    /// Create a session with a caller-supplied id. An existing session under
    /// the same id is closed first (reconnection).
    pub async fn connect_with_id(&self, id: &str, url: &str) -> IrgoResult<Arc<Session>> {
        let previous = self.sessions.write().unwrap().remove(id);
        if let Some(old) = previous {
            debug!(session_id = %id, "closing previous session for reconnect");
            old.close().await;
        }
        self.connect_session(id.to_string(), url).await
    }

    async fn connect_session(&self, id: String, url: &str) -> IrgoResult<Arc<Session>> {
        let handler = match self.find_handler(url) {
            Some(h) => h,
            None => return Err(IrgoError::NoHandler),
        };

        let session = Session::new(id.clone(), url, handler.clone(), self.queue_capacity);
        self.sessions
            .write()
            .unwrap()
            .insert(id.clone(), session.clone());

        if let Err(e) = handler.on_connect(&session).await {
            self.sessions.write().unwrap().remove(&id);
            warn!(session_id = %id, url, "connection rejected by handler");
            return Err(e);
        }

        debug!(session_id = %id, url, "session connected");
        if let Some(observer) = self.on_session_created.read().unwrap().as_ref() {
            observer(&session);
        }
        Ok(session)
    }

    /// Close and remove a session.
    pub async fn disconnect(&self, session_id: &str) {
        let removed = self.sessions.write().unwrap().remove(session_id);
        if let Some(session) = removed {
            session.close().await;
            if let Some(observer) = self.on_session_destroyed.read().unwrap().as_ref() {
                observer(&session);
            }
        }
    }

    /// Look up a session by id.
    pub fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().unwrap().get(session_id).cloned()
    }

    /// Process an inbound frame for a session.
    pub async fn handle_message(
        &self,
        session_id: &str,
        data: &[u8],
    ) -> IrgoResult<Option<WsEnvelope>> {
        let session = self.session(session_id).ok_or(IrgoError::SessionNotFound)?;
        session.handle_message(data).await
    }

    /// Queue an envelope on a specific session.
    pub fn send(&self, session_id: &str, envelope: WsEnvelope) -> IrgoResult<()> {
        let session = self.session(session_id).ok_or(IrgoError::SessionNotFound)?;
        if session.send(envelope) {
            Ok(())
        } else if session.is_closed() {
            Err(IrgoError::SessionClosed)
        } else {
            Err(IrgoError::ChannelFull)
        }
    }

    /// Queue an HTML fragment on a specific session.
    pub fn send_html(&self, session_id: &str, target: &str, html: &str) -> IrgoResult<()> {
        self.send(session_id, WsEnvelope::html(target, html))
    }

    /// Send an envelope to every session. The registry lock is released
    /// before any send; failures (closed or full queues) are silent.
    pub fn broadcast(&self, envelope: &WsEnvelope) {
        for session in self.all_sessions() {
            session.send(envelope.clone());
        }
    }

    /// Broadcast an HTML fragment to every session.
    pub fn broadcast_html(&self, target: &str, html: &str) {
        self.broadcast(&WsEnvelope::html(target, html));
    }

    /// Send an envelope to every session whose URL matches the pattern.
    pub fn broadcast_to_url(&self, pattern: &str, envelope: &WsEnvelope) {
        for session in self.sessions_for_url(pattern) {
            session.send(envelope.clone());
        }
    }

    /// Sessions whose URL matches the pattern.
    pub fn sessions_for_url(&self, pattern: &str) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .unwrap()
            .values()
            .filter(|s| matches_url(s.url(), pattern))
            .cloned()
            .collect()
    }

    /// Snapshot of all live sessions.
    pub fn all_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().unwrap().values().cloned().collect()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Sweep stale pending requests from every session.
    pub fn cleanup_expired(&self, ttl: Duration) {
        for session in self.all_sessions() {
            session.cleanup_expired_pending(ttl);
        }
    }

    /// Close every session and reset the registry.
    pub async fn close(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut map = self.sessions.write().unwrap();
            map.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            session.close().await;
            if let Some(observer) = self.on_session_destroyed.read().unwrap().as_ref() {
                observer(&session);
            }
        }
    }

    /// Whether a handler (or the default) would accept a connection to `url`.
    pub fn has_handler(&self, url: &str) -> bool {
        self.find_handler(url).is_some()
    }

    fn find_handler(&self, url: &str) -> Option<Arc<dyn MessageHandler>> {
        let handlers = self.handlers.read().unwrap();

        if let Some(h) = lookup(&handlers, url) {
            return Some(h);
        }
        let path = extract_path(url);
        if path != url {
            if let Some(h) = lookup(&handlers, path) {
                return Some(h);
            }
        }
        self.default_handler.read().unwrap().clone()
    }

    fn generate_session_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("ws_{}_{}", Utc::now().format("%Y%m%d%H%M%S"), n)
    }
}

/// Exact match first, then the longest matching trailing-slash prefix.
fn lookup(
    handlers: &HashMap<String, Arc<dyn MessageHandler>>,
    url: &str,
) -> Option<Arc<dyn MessageHandler>> {
    if let Some(h) = handlers.get(url) {
        return Some(h.clone());
    }
    handlers
        .iter()
        .filter(|(pattern, _)| pattern.ends_with('/') && url.starts_with(pattern.as_str()))
        .max_by_key(|(pattern, _)| pattern.len())
        .map(|(_, h)| h.clone())
}

/// Whether a session URL matches a pattern, on the URL as given and on its
/// extracted path.
pub fn matches_url(url: &str, pattern: &str) -> bool {
    if url == pattern {
        return true;
    }
    if pattern.ends_with('/') && url.starts_with(pattern) {
        return true;
    }
    let path = extract_path(url);
    path == pattern || (pattern.ends_with('/') && path.starts_with(pattern))
}

/// Strip scheme and host from a full URL, leaving the path.
pub fn extract_path(url: &str) -> &str {
    let rest = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => url,
    };
    match rest.find('/') {
        Some(idx) => &rest[idx..],
        None => "/",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MessageHandler;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Records which handler instance saw connect/message/close.
    struct Recorder {
        name: &'static str,
        connects: Arc<Mutex<Vec<String>>>,
        closes: AtomicUsize,
        reject: bool,
    }

    impl Recorder {
        fn new(name: &'static str, connects: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                connects,
                closes: AtomicUsize::new(0),
                reject: false,
            }
        }
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn on_connect(&self, session: &Arc<Session>) -> IrgoResult<()> {
            if self.reject {
                return Err(IrgoError::Handler("rejected".into()));
            }
            self.connects
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, session.url()));
            Ok(())
        }

        async fn on_message(
            &self,
            _session: &Arc<Session>,
            request: WsRequest,
        ) -> IrgoResult<Option<WsEnvelope>> {
            Ok(Some(WsEnvelope::html(self.name, request.payload_str())))
        }

        async fn on_close(&self, _session: &Arc<Session>) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn extract_path_strips_scheme_and_host() {
        assert_eq!(extract_path("ws://localhost:8080/ws/chat"), "/ws/chat");
        assert_eq!(extract_path("/ws/chat"), "/ws/chat");
        assert_eq!(extract_path("wss://host"), "/");
    }

    #[test]
    fn match_url_prefix_rules() {
        assert!(matches_url("/ws/chat", "/ws/chat"));
        assert!(matches_url("/ws/chat", "/ws/"));
        assert!(!matches_url("/ws", "/ws/"));
        assert!(matches_url("ws://h:1/ws/chat", "/ws/"));
        assert!(!matches_url("/other", "/ws/"));
    }

    #[tokio::test]
    async fn exact_pattern_beats_prefix() {
        let connects = Arc::new(Mutex::new(Vec::new()));
        let hub = Hub::new();
        hub.handle("/ws/", Recorder::new("prefix", connects.clone()));
        hub.handle("/ws/chat", Recorder::new("exact", connects.clone()));

        hub.connect("/ws/chat").await.unwrap();
        hub.connect("/ws/room42").await.unwrap();

        let seen = connects.lock().unwrap().clone();
        assert_eq!(seen, vec!["exact:/ws/chat", "prefix:/ws/room42"]);
    }

    #[tokio::test]
    async fn longest_prefix_wins() {
        let connects = Arc::new(Mutex::new(Vec::new()));
        let hub = Hub::new();
        hub.handle("/ws/", Recorder::new("short", connects.clone()));
        hub.handle("/ws/chat/", Recorder::new("long", connects.clone()));

        hub.connect("/ws/chat/room1").await.unwrap();
        assert_eq!(connects.lock().unwrap()[0], "long:/ws/chat/room1");
    }

    #[tokio::test]
    async fn full_url_resolves_via_extracted_path() {
        let connects = Arc::new(Mutex::new(Vec::new()));
        let hub = Hub::new();
        hub.handle("/ws/chat", Recorder::new("exact", connects.clone()));

        hub.connect("ws://127.0.0.1:9000/ws/chat").await.unwrap();
        assert_eq!(connects.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn connect_without_handler_fails() {
        let hub = Hub::new();
        assert!(matches!(
            hub.connect("/nowhere").await,
            Err(IrgoError::NoHandler)
        ));
        assert_eq!(hub.session_count(), 0);
    }

    #[tokio::test]
    async fn default_handler_catches_unmatched() {
        let connects = Arc::new(Mutex::new(Vec::new()));
        let hub = Hub::new();
        hub.set_default_handler(Recorder::new("default", connects.clone()));

        hub.connect("/anything").await.unwrap();
        assert_eq!(connects.lock().unwrap()[0], "default:/anything");
    }

    #[tokio::test]
    async fn rejected_connect_leaves_no_session() {
        let connects = Arc::new(Mutex::new(Vec::new()));
        let hub = Hub::new();
        let mut handler = Recorder::new("r", connects);
        handler.reject = true;
        hub.handle("/ws/chat", handler);

        assert!(hub.connect("/ws/chat").await.is_err());
        assert_eq!(hub.session_count(), 0);
    }

    #[tokio::test]
    async fn session_ids_are_monotonic_and_unique() {
        let hub = Hub::new();
        hub.handle_fn("/ws/", |_, _| Ok(None));

        let a = hub.connect("/ws/a").await.unwrap();
        let b = hub.connect("/ws/b").await.unwrap();
        assert_ne!(a.id(), b.id());
        assert!(a.id().starts_with("ws_"));
        assert!(a.id().ends_with("_1"));
        assert!(b.id().ends_with("_2"));
    }

    #[tokio::test]
    async fn reconnect_with_same_id_closes_previous() {
        let hub = Hub::new();
        hub.handle_fn("/ws/", |_, _| Ok(None));

        let first = hub.connect_with_id("sid", "/ws/x").await.unwrap();
        let first_done = first.done();
        let second = hub.connect_with_id("sid", "/ws/x").await.unwrap();

        assert!(first.is_closed());
        first_done.cancelled().await;
        assert!(!second.is_closed());
        assert_eq!(hub.session_count(), 1);
        assert!(Arc::ptr_eq(&hub.session("sid").unwrap(), &second));
    }

    #[tokio::test]
    async fn disconnect_closes_and_notifies() {
        let hub = Hub::new();
        hub.handle_fn("/ws/", |_, _| Ok(None));
        let destroyed = Arc::new(AtomicUsize::new(0));
        {
            let destroyed = destroyed.clone();
            hub.on_session_destroyed(move |_| {
                destroyed.fetch_add(1, Ordering::SeqCst);
            });
        }

        let session = hub.connect("/ws/a").await.unwrap();
        hub.disconnect(session.id()).await;

        assert!(session.is_closed());
        assert_eq!(hub.session_count(), 0);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);

        // Disconnecting an unknown id is a no-op.
        hub.disconnect("missing").await;
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handle_message_routes_to_session_handler() {
        let hub = Hub::new();
        hub.handle_fn("/ws/echo", |_, req| {
            Ok(Some(WsEnvelope::html("#out", req.payload_str())))
        });

        let session = hub.connect("/ws/echo").await.unwrap();
        let response = hub
            .handle_message(session.id(), br#"{"payload":"ping"}"#)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.payload_str(), "ping");

        assert!(matches!(
            hub.handle_message("missing", b"{}").await,
            Err(IrgoError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn send_distinguishes_missing_closed_and_full() {
        let hub = Hub::with_queue_capacity(1);
        hub.handle_fn("/ws/", |_, _| Ok(None));
        let session = hub.connect("/ws/a").await.unwrap();

        assert!(hub.send(session.id(), WsEnvelope::html("#t", "a")).is_ok());
        assert!(matches!(
            hub.send(session.id(), WsEnvelope::html("#t", "b")),
            Err(IrgoError::ChannelFull)
        ));

        session.close().await;
        assert!(matches!(
            hub.send(session.id(), WsEnvelope::html("#t", "c")),
            Err(IrgoError::SessionClosed)
        ));
        assert!(matches!(
            hub.send("missing", WsEnvelope::html("#t", "d")),
            Err(IrgoError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn broadcast_to_url_reaches_each_matching_session_once() {
        let hub = Hub::new();
        hub.handle_fn("/ws/", |_, _| Ok(None));

        let chat: Vec<_> = [
            hub.connect("/ws/chat").await.unwrap(),
            hub.connect("/ws/chat").await.unwrap(),
            hub.connect("/ws/chat").await.unwrap(),
        ]
        .into();
        let other = hub.connect("/other/feed").await.unwrap();

        hub.broadcast_to_url("/ws/", &WsEnvelope::html("#t", "fanout"));

        for session in &chat {
            let env = session.recv_outbound().await.unwrap();
            assert_eq!(env.payload_str(), "fanout");
        }
        // The non-matching session got nothing.
        other.close().await;
        assert!(other.recv_outbound().await.is_none());
    }

    #[tokio::test]
    async fn hub_close_closes_everything() {
        let hub = Hub::new();
        hub.handle_fn("/ws/", |_, _| Ok(None));
        let a = hub.connect("/ws/a").await.unwrap();
        let b = hub.connect("/ws/b").await.unwrap();

        hub.close().await;
        assert!(a.is_closed());
        assert!(b.is_closed());
        assert_eq!(hub.session_count(), 0);
    }

    #[tokio::test]
    async fn cleanup_expired_sweeps_all_sessions() {
        let hub = Hub::new();
        hub.handle_fn("/ws/", |_, _| Ok(None));
        let session = hub.connect("/ws/a").await.unwrap();
        session
            .handle_message(br#"{"request_id":"r1"}"#)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        hub.cleanup_expired(Duration::from_millis(1));
        assert!(session.get_pending_request("r1").is_none());
    }
}
