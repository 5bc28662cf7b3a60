//! Channel implementation over a real WebSocket connection to the loopback
//! server.

use crate::channel::Channel;
use crate::message::Message;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use irgo_core::{IrgoError, IrgoResult};
use irgo_hub::WsEnvelope;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

static CHANNEL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A [`Channel`] over a WebSocket connection to the loopback server.
///
/// Outbound messages are serialized as JSON envelope frames; a reader task
/// feeds inbound frames into a bounded queue, dropping messages when the
/// consumer falls behind.
pub struct LoopbackChannel {
    id: String,
    url: String,
    writer: Mutex<WsSink>,
    incoming: Mutex<mpsc::Receiver<Message>>,
    metadata: RwLock<HashMap<String, serde_json::Value>>,
    done: CancellationToken,
    reader: tokio::task::JoinHandle<()>,
}

impl LoopbackChannel {
    pub(crate) fn new(
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        url: impl Into<String>,
        buffer_size: usize,
    ) -> Self {
        let (writer, reader_half) = stream.split();
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        let done = CancellationToken::new();

        let reader = tokio::spawn(read_loop(reader_half, tx, done.clone()));

        Self {
            id: format!("ch_{}", CHANNEL_COUNTER.fetch_add(1, Ordering::SeqCst) + 1),
            url: url.into(),
            writer: Mutex::new(writer),
            incoming: Mutex::new(rx),
            metadata: RwLock::new(HashMap::new()),
            done,
            reader,
        }
    }
}

/// Reads socket frames into the incoming queue until the socket or the
/// channel closes. Messages hitting a full queue are dropped.
async fn read_loop(mut reader: WsStream, tx: mpsc::Sender<Message>, done: CancellationToken) {
    loop {
        let frame = tokio::select! {
            _ = done.cancelled() => break,
            frame = reader.next() => frame,
        };

        let envelope: WsEnvelope = match frame {
            Some(Ok(WsMessage::Text(text))) => match serde_json::from_str(text.as_str()) {
                Ok(env) => env,
                Err(e) => {
                    debug!(error = %e, "discarding unparseable frame");
                    continue;
                }
            },
            Some(Ok(WsMessage::Binary(bytes))) => match serde_json::from_slice(&bytes) {
                Ok(env) => env,
                Err(e) => {
                    debug!(error = %e, "discarding unparseable frame");
                    continue;
                }
            },
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(error = %e, "websocket read failed");
                break;
            }
        };

        if tx.try_send(envelope.into()).is_err() {
            debug!("incoming buffer full, dropping message");
        }
    }
    done.cancel();
}

#[async_trait]
impl Channel for LoopbackChannel {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    async fn send(&self, message: Message) -> IrgoResult<()> {
        if self.done.is_cancelled() {
            return Err(IrgoError::ChannelClosed);
        }
        let envelope: WsEnvelope = message.into();
        let frame = serde_json::to_string(&envelope)?;
        self.writer
            .lock()
            .await
            .send(WsMessage::Text(frame.into()))
            .await
            .map_err(|e| IrgoError::Transport(format!("websocket send failed: {e}")))
    }

    async fn recv(&self) -> Option<Message> {
        self.incoming.lock().await.recv().await
    }

    async fn close(&self) -> IrgoResult<()> {
        if self.done.is_cancelled() {
            return Ok(());
        }
        self.done.cancel();
        let _ = self
            .writer
            .lock()
            .await
            .send(WsMessage::Close(None))
            .await;
        Ok(())
    }

    fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    fn set(&self, key: &str, value: serde_json::Value) {
        self.metadata.write().unwrap().insert(key.to_string(), value);
    }

    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.metadata.read().unwrap().get(key).cloned()
    }
}

impl Drop for LoopbackChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
