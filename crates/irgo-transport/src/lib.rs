//! irgo-transport: Unified communication layer between a WebView frontend and
//! in-process handlers.
//!
//! Two implementations of the same [`Transport`] facade:
//!
//! - [`InProcessTransport`] handles everything in memory. Requests run through
//!   the virtual HTTP [`adapter`], channels are virtual WebSocket sessions on
//!   an [`irgo_hub::Hub`]. No sockets are opened. This is the mobile path.
//! - [`LoopbackTransport`] binds a real server to `127.0.0.1` for desktop
//!   debugging, guarded by per-launch secret and origin checks.
//!
//! Handlers talk to clients through [`Channel`]s: typed send/receive over a
//! bounded queue, best-effort delivery, explicit backpressure signals.

pub mod adapter;
pub mod channel;
pub mod config;
pub mod inprocess;
pub mod loopback;
pub mod message;
pub mod middleware;
pub mod security;
pub mod testkit;

mod inprocess_channel;
mod loopback_channel;

pub use adapter::{Dispatcher, DispatcherFn, HttpAdapter, ResponseCapture, ResponseSink};
pub use channel::{Channel, ChannelHandler};
pub use config::Config;
pub use inprocess::InProcessTransport;
pub use inprocess_channel::InProcessChannel;
pub use loopback::LoopbackTransport;
pub use loopback_channel::LoopbackChannel;
pub use message::Message;

use async_trait::async_trait;
use irgo_core::{IrgoResult, Request, Response};
use std::sync::Arc;

/// The communication facade between the WebView and handlers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Process an HTTP-shaped request and return the response. Fails with
    /// [`irgo_core::IrgoError::TransportClosed`] when the transport is not
    /// running. Dropping the returned future abandons the request; dispatch
    /// itself runs to completion in memory.
    async fn handle_request(&self, request: Request) -> IrgoResult<Response>;

    /// Open a bidirectional channel for WebSocket-like communication. The URL
    /// is matched against registered channel handlers.
    async fn open_channel(&self, url: &str) -> IrgoResult<Arc<dyn Channel>>;

    /// Register the handler for channels matching a URL pattern. Patterns are
    /// exact (`/ws/chat`) or trailing-slash prefixes (`/ws/`).
    fn register_channel_handler(&self, pattern: &str, handler: Arc<dyn ChannelHandler>);

    /// Set the fallback handler for unmatched channel URLs.
    fn set_default_channel_handler(&self, handler: Arc<dyn ChannelHandler>);

    /// Start the transport. The loopback variant binds its server here; the
    /// in-process variant only flips the running latch.
    async fn start(&self) -> IrgoResult<()>;

    /// Gracefully shut down, closing all channels.
    async fn stop(&self) -> IrgoResult<()>;

    /// The transport configuration.
    fn config(&self) -> &Config;
}
