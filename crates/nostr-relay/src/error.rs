use thiserror::Error;

/// Error taxonomy for relay connectivity, the message pool, and the relay
/// manager. Network errors are absorbed into a relay's own reconnecting
/// state rather than surfaced here; this enum covers what a caller of
/// `RelayManager`/`Relay` can actually receive back synchronously.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("event must be signed before it can be published")]
    EventNotSigned,

    #[error("failed to verify signature")]
    SignatureVerificationFailed,

    #[error("no relay registered at {0}")]
    UnknownRelay(String),

    #[error("no subscription with id {0}")]
    UnknownSubscription(String),

    #[error("received malformed relay message: {0}")]
    InvalidMessage(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("relay is not connected")]
    NotConnected,

    #[error("no relay in the manager reached `Connected` within the warmup window")]
    WarmupFailed,

    #[error(transparent)]
    Core(#[from] nostr_core::NostrError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RelayError::WebSocket(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
