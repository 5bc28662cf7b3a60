//! The channel abstraction handlers and bridges program against.

use crate::message::Message;
use async_trait::async_trait;
use irgo_core::{IrgoError, IrgoResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A bidirectional message channel over some transport.
///
/// Delivery is best-effort: sends into a full queue fail with
/// [`IrgoError::ChannelFull`] and inbound messages that arrive while the
/// buffer is full are dropped. Ordering within the channel is FIFO in each
/// direction.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique channel identifier.
    fn id(&self) -> String;

    /// The URL this channel was opened against.
    fn url(&self) -> String;

    /// Send a message to the peer. Fails with [`IrgoError::ChannelClosed`]
    /// after close and [`IrgoError::ChannelFull`] when the outbound queue is
    /// full; the caller decides whether to retry or escalate.
    async fn send(&self, message: Message) -> IrgoResult<()>;

    /// Receive the next inbound message. Returns `None` once the channel has
    /// closed and any buffered messages have drained. Single-reader FIFO.
    async fn recv(&self) -> Option<Message>;

    /// Close the channel. Idempotent.
    async fn close(&self) -> IrgoResult<()>;

    /// A latch that trips when the channel finishes; usable in `select!`.
    fn done(&self) -> CancellationToken;

    /// Store channel metadata. Last writer wins per key.
    fn set(&self, key: &str, value: serde_json::Value);

    /// Fetch channel metadata.
    fn get(&self, key: &str) -> Option<serde_json::Value>;

    /// Forward messages from a stream with backpressure, stopping on
    /// cancellation, channel close, source exhaustion, or the first send
    /// error. The only streaming-write API.
    async fn send_stream(
        &self,
        cancel: CancellationToken,
        mut stream: mpsc::Receiver<Message>,
    ) -> IrgoResult<()> {
        let done = self.done();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(IrgoError::Cancelled),
                _ = done.cancelled() => return Err(IrgoError::ChannelClosed),
                next = stream.recv() => match next {
                    Some(message) => self.send(message).await?,
                    None => return Ok(()),
                },
            }
        }
    }
}

/// Application-level handler for channels matching one URL pattern.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    /// Called when a channel is opened. Returning an error rejects the
    /// connection.
    async fn on_connect(&self, channel: Arc<dyn Channel>) -> IrgoResult<()> {
        let _ = channel;
        Ok(())
    }

    /// Called for each inbound message. The returned message, if any, is the
    /// direct response.
    async fn on_message(
        &self,
        channel: Arc<dyn Channel>,
        message: Message,
    ) -> IrgoResult<Option<Message>>;

    /// Called exactly once when the channel closes.
    async fn on_close(&self, channel: Arc<dyn Channel>) {
        let _ = channel;
    }
}
