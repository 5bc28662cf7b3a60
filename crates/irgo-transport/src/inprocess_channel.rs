//! Channel implementation backed by a virtual WebSocket session.

use crate::channel::Channel;
use crate::message::Message;
use async_trait::async_trait;
use irgo_core::{IrgoError, IrgoResult};
use irgo_hub::Session;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A [`Channel`] wrapping an in-process [`Session`]. No network I/O occurs.
///
/// The channel is a view: cloning it, or constructing several around the same
/// session, shares the session's queue, metadata, and close latch. Closing any
/// view closes the session.
#[derive(Clone)]
pub struct InProcessChannel {
    session: Arc<Session>,
}

impl InProcessChannel {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// The underlying session, for advanced usage.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Send an HTML fragment to a target element.
    pub async fn send_html(&self, target: &str, html: &str) -> IrgoResult<()> {
        self.send(Message::html(target, html)).await
    }

    /// Send a reply correlated with a tracked request id.
    pub async fn reply(&self, request_id: &str, html: &str) -> IrgoResult<()> {
        self.send(Message::reply(request_id, html)).await
    }
}

#[async_trait]
impl Channel for InProcessChannel {
    fn id(&self) -> String {
        self.session.id().to_string()
    }

    fn url(&self) -> String {
        self.session.url().to_string()
    }

    async fn send(&self, message: Message) -> IrgoResult<()> {
        if self.session.is_closed() {
            return Err(IrgoError::ChannelClosed);
        }
        if self.session.send(message.into()) {
            Ok(())
        } else if self.session.is_closed() {
            Err(IrgoError::ChannelClosed)
        } else {
            Err(IrgoError::ChannelFull)
        }
    }

    async fn recv(&self) -> Option<Message> {
        self.session.recv_outbound().await.map(Message::from)
    }

    async fn close(&self) -> IrgoResult<()> {
        self.session.close().await;
        Ok(())
    }

    fn done(&self) -> CancellationToken {
        self.session.done()
    }

    fn set(&self, key: &str, value: serde_json::Value) {
        self.session.set(key, value);
    }

    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.session.get(key)
    }
}
