//! Loopback transport: the desktop debugging path.
//!
//! The same facade as the in-process variant, served over a real HTTP and
//! WebSocket server bound to localhost. Every request passes through the
//! security stack (CORS, strict origin, per-launch secret, WebSocket secret)
//! before it reaches the user dispatcher; WebSocket upgrades are bridged onto
//! the same hub the in-process variant uses.

use crate::adapter::{Dispatcher, HttpAdapter};
use crate::channel::{Channel, ChannelHandler};
use crate::config::Config;
use crate::inprocess::HubChannelAdapter;
use crate::loopback_channel::LoopbackChannel;
use crate::message::Message;
use crate::middleware::Cors;
use crate::security::{SecretValidation, StrictOrigin, WsSecret};
use crate::Transport;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ws::{Message as SocketMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use irgo_core::{generate_secret, IrgoError, IrgoResult, Request, Response, SECRET_QUERY_PARAM};
use irgo_hub::{Hub, Session};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on buffered request bodies (10 MiB).
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// How long `stop` waits for the server task before abandoning it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// [`Transport`] implementation over a real localhost server.
pub struct LoopbackTransport {
    dispatcher: Arc<dyn Dispatcher>,
    hub: Arc<Hub>,
    config: Config,
    running: AtomicBool,
    state: RwLock<Option<ServerState>>,
    server: Mutex<Option<JoinHandle<()>>>,
}

/// Live server details, present between `start` and `stop`.
#[derive(Clone)]
struct ServerState {
    addr: SocketAddr,
    secret: String,
    adapter: HttpAdapter,
    shutdown: CancellationToken,
}

/// State shared with the request handlers.
struct ServerShared {
    adapter: HttpAdapter,
    hub: Arc<Hub>,
    secret: String,
}

impl LoopbackTransport {
    /// Create a transport over the given dispatcher with its own hub.
    pub fn new(dispatcher: Arc<dyn Dispatcher>, config: Config) -> Self {
        let hub = Arc::new(Hub::with_queue_capacity(config.channel_buffer_size));
        Self::with_hub(dispatcher, hub, config)
    }

    /// Create a transport sharing an externally owned hub.
    pub fn with_hub(dispatcher: Arc<dyn Dispatcher>, hub: Arc<Hub>, config: Config) -> Self {
        Self {
            dispatcher,
            hub,
            config,
            running: AtomicBool::new(false),
            state: RwLock::new(None),
            server: Mutex::new(None),
        }
    }

    /// The WebSocket hub, for direct access.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// The server base URL, once started.
    pub fn url(&self) -> Option<String> {
        self.state
            .read()
            .unwrap()
            .as_ref()
            .map(|s| format!("http://{}", s.addr))
    }

    /// The bound port, once started.
    pub fn port(&self) -> Option<u16> {
        self.state.read().unwrap().as_ref().map(|s| s.addr.port())
    }

    /// The per-launch secret, once started. Inject it into the WebView; never
    /// log it.
    pub fn secret(&self) -> Option<String> {
        self.state.read().unwrap().as_ref().map(|s| s.secret.clone())
    }

    /// Send a message to a specific channel by session id.
    pub fn send_to_channel(&self, session_id: &str, message: Message) -> IrgoResult<()> {
        let session = self
            .hub
            .session(session_id)
            .ok_or(IrgoError::ChannelClosed)?;
        if session.send(message.into()) {
            Ok(())
        } else if session.is_closed() {
            Err(IrgoError::ChannelClosed)
        } else {
            Err(IrgoError::ChannelFull)
        }
    }

    /// Send a message to every channel matching a URL pattern.
    pub fn broadcast_to_url(&self, pattern: &str, message: Message) {
        self.hub.broadcast_to_url(pattern, &message.into());
    }

    /// Send a message to every channel.
    pub fn broadcast(&self, message: Message) {
        self.hub.broadcast(&message.into());
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The security stack applied in front of the user dispatcher:
    /// CORS → strict origin → secret validation → WebSocket secret → user.
    fn build_dispatcher_stack(&self, secret: &str, origins: &[String]) -> Arc<dyn Dispatcher> {
        let chain: Arc<dyn Dispatcher> =
            Arc::new(WsSecret::new(self.dispatcher.clone(), secret));
        let chain: Arc<dyn Dispatcher> = Arc::new(SecretValidation::new(
            chain,
            secret,
            self.config.exclude_paths.clone(),
        ));
        let chain: Arc<dyn Dispatcher> =
            Arc::new(StrictOrigin::new(chain, origins.iter().cloned()));
        Arc::new(Cors::new(chain, origins.iter().cloned()))
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn handle_request(&self, request: Request) -> IrgoResult<Response> {
        if !self.is_running() {
            return Err(IrgoError::TransportClosed);
        }
        let adapter = match self.state.read().unwrap().as_ref() {
            Some(state) => state.adapter.clone(),
            None => return Err(IrgoError::TransportClosed),
        };
        Ok(adapter.handle(&request).await)
    }

    async fn open_channel(&self, url: &str) -> IrgoResult<Arc<dyn Channel>> {
        if !self.is_running() {
            return Err(IrgoError::TransportClosed);
        }
        let (addr, secret) = match self.state.read().unwrap().as_ref() {
            Some(state) => (state.addr, state.secret.clone()),
            None => return Err(IrgoError::TransportClosed),
        };

        let separator = if url.contains('?') { '&' } else { '?' };
        let ws_url = format!("ws://{addr}{url}{separator}{SECRET_QUERY_PARAM}={secret}");
        let (stream, _response) = connect_async(ws_url).await.map_err(|e| match e {
            WsError::Http(ref response) if response.status() == 404 => IrgoError::NoHandler,
            e => IrgoError::Transport(format!("websocket connect failed: {e}")),
        })?;

        debug!(url, "loopback channel opened");
        Ok(Arc::new(LoopbackChannel::new(
            stream,
            url,
            self.config.channel_buffer_size,
        )))
    }

    fn register_channel_handler(&self, pattern: &str, handler: Arc<dyn ChannelHandler>) {
        self.hub.handle(pattern, HubChannelAdapter { handler });
    }

    fn set_default_channel_handler(&self, handler: Arc<dyn ChannelHandler>) {
        self.hub.set_default_handler(HubChannelAdapter { handler });
    }

    async fn start(&self) -> IrgoResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let secret = if self.config.secret.is_empty() {
            generate_secret()?
        } else {
            self.config.secret.clone()
        };

        let listener = TcpListener::bind((self.config.address.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;

        // The server's own origin is always acceptable to the browser-facing
        // layers, alongside anything configured.
        let mut origins = self.config.allowed_origins.clone();
        origins.push(format!("http://{addr}"));

        let adapter = HttpAdapter::new(self.build_dispatcher_stack(&secret, &origins));
        let shutdown = CancellationToken::new();

        let shared = Arc::new(ServerShared {
            adapter: adapter.clone(),
            hub: self.hub.clone(),
            secret: secret.clone(),
        });
        let app = Router::new().fallback(serve_request).with_state(shared);

        let server_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(server_shutdown.cancelled_owned())
                .await;
            if let Err(e) = result {
                warn!(error = %e, "loopback server terminated with error");
            }
        });

        *self.state.write().unwrap() = Some(ServerState {
            addr,
            secret,
            adapter,
            shutdown,
        });
        *self.server.lock().await = Some(handle);

        info!(%addr, "loopback transport listening");
        Ok(())
    }

    async fn stop(&self) -> IrgoResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let state = self.state.write().unwrap().take();
        if let Some(state) = state {
            state.shutdown.cancel();
        }

        // Closing the hub first unblocks the WebSocket bridges so the server
        // can drain its connections.
        self.hub.close().await;

        if let Some(handle) = self.server.lock().await.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!("loopback server did not stop in time");
            }
        }

        debug!("loopback transport stopped");
        Ok(())
    }

    fn config(&self) -> &Config {
        &self.config
    }
}

/// Catch-all entry point: WebSocket upgrades are bridged onto the hub,
/// everything else runs through the middleware-wrapped adapter.
async fn serve_request(
    State(shared): State<Arc<ServerShared>>,
    ws: Option<WebSocketUpgrade>,
    request: axum::extract::Request,
) -> AxumResponse {
    if let Some(ws) = ws {
        let path = request.uri().path().to_string();
        let query = request.uri().query().unwrap_or("");
        let supplied = url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == SECRET_QUERY_PARAM)
            .map(|(_, v)| v.into_owned());

        if supplied.as_deref() != Some(shared.secret.as_str()) {
            warn!(path, "websocket upgrade rejected: missing or invalid secret");
            return (StatusCode::FORBIDDEN, "Forbidden").into_response();
        }

        if !shared.hub.has_handler(&path) {
            debug!(path, "websocket upgrade rejected: no handler");
            return (StatusCode::NOT_FOUND, "no handler registered for URL").into_response();
        }

        let hub = shared.hub.clone();
        return ws.on_upgrade(move |socket| serve_ws(hub, socket, path));
    }

    let core_request = match to_core_request(request).await {
        Ok(req) => req,
        Err(response) => return response,
    };
    to_axum_response(shared.adapter.handle(&core_request).await)
}

/// Bridge one WebSocket connection onto a hub session: inbound frames go
/// through `handle_message`, the session's outbound queue is drained onto the
/// socket.
async fn serve_ws(hub: Arc<Hub>, socket: WebSocket, path: String) {
    let session = match hub.connect(&path).await {
        Ok(session) => session,
        Err(e) => {
            debug!(path, error = %e, "websocket connection refused");
            return;
        }
    };
    let session_id = session.id().to_string();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outbound = session.recv_outbound() => match outbound {
                Some(envelope) => {
                    let frame = match serde_json::to_string(&envelope) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(error = %e, "dropping unserializable envelope");
                            continue;
                        }
                    };
                    if sink.send(SocketMessage::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = sink.send(SocketMessage::Close(None)).await;
                    break;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(SocketMessage::Text(text))) => {
                    dispatch_frame(&hub, &session, &session_id, text.as_str().as_bytes()).await;
                }
                Some(Ok(SocketMessage::Binary(bytes))) => {
                    dispatch_frame(&hub, &session, &session_id, &bytes).await;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },
        }
    }

    hub.disconnect(&session_id).await;
}

async fn dispatch_frame(hub: &Arc<Hub>, session: &Arc<Session>, session_id: &str, data: &[u8]) {
    match hub.handle_message(session_id, data).await {
        // Direct responses share the outbound queue so ordering with other
        // sends is preserved.
        Ok(Some(envelope)) => {
            session.send(envelope);
        }
        Ok(None) => {}
        Err(e) => {
            debug!(session_id, error = %e, "inbound frame failed");
        }
    }
}

/// Convert an incoming server request into the core envelope.
async fn to_core_request(request: axum::extract::Request) -> Result<Request, AxumResponse> {
    let method = request.method().as_str().to_string();
    let url = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut core = Request::new(method, url);
    for (name, value) in request.headers() {
        if let Ok(value) = value.to_str() {
            core.set_header(name.as_str(), value);
        }
    }

    match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => {
            core.body = bytes.to_vec();
            Ok(core)
        }
        Err(_) => Err((StatusCode::BAD_REQUEST, "unreadable body").into_response()),
    }
}

/// Convert a response envelope back into a server response.
fn to_axum_response(response: Response) -> AxumResponse {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = axum::http::Response::builder().status(status);
    for (key, value) in &response.headers {
        builder = builder.header(key.as_str(), value.as_str());
    }
    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
