use thiserror::Error;

/// Errors produced by the irgo transport layer.
#[derive(Debug, Error)]
pub enum IrgoError {
    #[error("transport closed")]
    TransportClosed,

    #[error("channel closed")]
    ChannelClosed,

    #[error("channel buffer full")]
    ChannelFull,

    #[error("no handler registered for URL")]
    NoHandler,

    #[error("websocket session not found")]
    SessionNotFound,

    #[error("websocket session closed")]
    SessionClosed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for IrgoError {
    fn from(e: serde_json::Error) -> Self {
        IrgoError::Malformed(e.to_string())
    }
}

pub type IrgoResult<T> = Result<T, IrgoError>;
