//! In-memory transport: the mobile path.
//!
//! Requests run through the virtual HTTP adapter and channels are virtual
//! WebSocket sessions on a hub. No sockets are opened.

use crate::adapter::{Dispatcher, HttpAdapter};
use crate::channel::{Channel, ChannelHandler};
use crate::config::Config;
use crate::inprocess_channel::InProcessChannel;
use crate::message::Message;
use crate::Transport;
use async_trait::async_trait;
use irgo_core::{IrgoError, IrgoResult, Request, Response};
use irgo_hub::{Hub, MessageHandler, Session, WsEnvelope, WsRequest};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// [`Transport`] implementation that processes everything in-process.
pub struct InProcessTransport {
    adapter: HttpAdapter,
    hub: Arc<Hub>,
    config: Config,
    running: AtomicBool,
}

impl InProcessTransport {
    /// Create a transport over the given dispatcher with its own hub.
    pub fn new(dispatcher: Arc<dyn Dispatcher>, config: Config) -> Self {
        let hub = Arc::new(Hub::with_queue_capacity(config.channel_buffer_size));
        Self::with_hub(dispatcher, hub, config)
    }

    /// Create a transport sharing an externally owned hub.
    pub fn with_hub(dispatcher: Arc<dyn Dispatcher>, hub: Arc<Hub>, config: Config) -> Self {
        Self {
            adapter: HttpAdapter::new(dispatcher),
            hub,
            config,
            running: AtomicBool::new(false),
        }
    }

    /// The WebSocket hub, for direct access.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
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
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn handle_request(&self, request: Request) -> IrgoResult<Response> {
        if !self.is_running() {
            return Err(IrgoError::TransportClosed);
        }
        Ok(self.adapter.handle(&request).await)
    }

    async fn open_channel(&self, url: &str) -> IrgoResult<Arc<dyn Channel>> {
        if !self.is_running() {
            return Err(IrgoError::TransportClosed);
        }
        let session = self.hub.connect(url).await?;
        Ok(Arc::new(InProcessChannel::new(session)))
    }

    fn register_channel_handler(&self, pattern: &str, handler: Arc<dyn ChannelHandler>) {
        self.hub.handle(pattern, HubChannelAdapter { handler });
    }

    fn set_default_channel_handler(&self, handler: Arc<dyn ChannelHandler>) {
        self.hub.set_default_handler(HubChannelAdapter { handler });
    }

    async fn start(&self) -> IrgoResult<()> {
        self.running.store(true, Ordering::SeqCst);
        debug!("in-process transport started");
        Ok(())
    }

    async fn stop(&self) -> IrgoResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.hub.close().await;
        debug!("in-process transport stopped");
        Ok(())
    }

    fn config(&self) -> &Config {
        &self.config
    }
}

/// Lifts a [`ChannelHandler`] to the hub's [`MessageHandler`] interface by
/// wrapping the session in a channel for each callback.
pub(crate) struct HubChannelAdapter {
    pub(crate) handler: Arc<dyn ChannelHandler>,
}

impl HubChannelAdapter {
    fn channel(session: &Arc<Session>) -> Arc<dyn Channel> {
        Arc::new(InProcessChannel::new(session.clone()))
    }
}

#[async_trait]
impl MessageHandler for HubChannelAdapter {
    async fn on_connect(&self, session: &Arc<Session>) -> IrgoResult<()> {
        self.handler.on_connect(Self::channel(session)).await
    }

    async fn on_message(
        &self,
        session: &Arc<Session>,
        request: WsRequest,
    ) -> IrgoResult<Option<WsEnvelope>> {
        let response = self
            .handler
            .on_message(Self::channel(session), request.into())
            .await?;
        Ok(response.map(Into::into))
    }

    async fn on_close(&self, session: &Arc<Session>) {
        self.handler.on_close(Self::channel(session)).await;
    }
}
