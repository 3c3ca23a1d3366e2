//! Client error types.

use thiserror::Error;

/// Client error type.
///
/// Identity and signing failures (`SignerUnavailable`, `SignerRejected`,
/// `PublishAborted`) are the ones meant to reach users; relay-level failures
/// are absorbed by the pool and the fetch aggregator.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no Nostr signer available: install or unlock a signer extension")]
    SignerUnavailable,

    #[error("signer rejected the request: {0}")]
    SignerRejected(String),

    #[error("publish aborted before broadcast: {0}")]
    PublishAborted(Box<ClientError>),

    #[error("local identity error: {0}")]
    Identity(String),

    #[error("relay unreachable: {url}: {reason}")]
    RelayUnreachable { url: String, reason: String },

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("no fetch request could be issued: {0}")]
    NoRequests(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(#[from] nostr::FilterError),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("timeout error: {0}")]
    Timeout(String),

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Whether the failure came from the signer rather than the network.
    pub fn is_signer_error(&self) -> bool {
        match self {
            Self::SignerUnavailable | Self::SignerRejected(_) => true,
            Self::PublishAborted(inner) => inner.is_signer_error(),
            _ => false,
        }
    }
}

impl From<nostr::Nip01Error> for ClientError {
    fn from(error: nostr::Nip01Error) -> Self {
        Self::InvalidEvent(error.to_string())
    }
}

/// Client result type.
pub type Result<T> = std::result::Result<T, ClientError>;
