use thiserror::Error;

/// Errors surfaced by the call coordinator.
///
/// Only `dial`, `hang_up` and `send_to_one` return these to the caller; everything
/// else is logged and dropped.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("already connected to {0}")]
    AlreadyConnected(String),

    #[error("not in a call with {0}")]
    UnknownDestination(String),

    #[error("session with {0} is not connected")]
    NotConnected(String),

    #[error("negotiation rejected: {0}")]
    NegotiationRejected(String),

    #[error("signaling transport failure: {0}")]
    TransportFailure(String),

    #[error("media attach failed: {0}")]
    MediaAttachFailure(String),

    #[error("stream fault: {0}")]
    StreamFault(String),

    #[error("peer session error: {0}")]
    Peer(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("malformed signal: {0}")]
    MalformedSignal(#[from] serde_json::Error),
}

impl From<webrtc::Error> for CallError {
    fn from(err: webrtc::Error) -> Self {
        CallError::Peer(err.to_string())
    }
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        CallError::TransportFailure(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CallError>;
