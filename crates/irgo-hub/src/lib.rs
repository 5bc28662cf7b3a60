//! irgo-hub: Virtual WebSocket sessions and the hub that routes them.
//!
//! A [`Session`] is one logical WebSocket-style connection with its own
//! bounded send queue, metadata map, and pending-request table. The [`Hub`]
//! owns all sessions, routes connection URLs to registered
//! [`MessageHandler`]s by exact or trailing-slash-prefix patterns, and fans
//! out broadcasts.

pub mod hub;
pub mod message;
pub mod session;

pub use hub::Hub;
pub use message::{parse_request, WsEnvelope, WsRequest};
pub use session::{MessageHandler, MessageHandlerFn, PendingRequest, Session};
