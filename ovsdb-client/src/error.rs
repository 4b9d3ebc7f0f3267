//! Client error types.

use ovsdb_core::CoreError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ovsdb_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("request canceled")]
    Canceled,

    /// Error object returned by the server, kept verbatim.
    #[error("server error: {0}")]
    Remote(serde_json::Value),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("subscription already exists: {0}")]
    SubscriptionExists(String),

    #[error("unknown subscription: {0}")]
    UnknownSubscription(String),

    #[error("unknown database: {0}")]
    UnknownDatabase(String),

    /// A transaction whose operations reported an error.
    #[error("transaction failed: {0}")]
    Transaction(String),
}

impl ClientError {
    /// Returns whether this error is retryable.
    ///
    /// Retryable errors are the transport class: the request may succeed on
    /// a fresh connection.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::NotConnected
                | ClientError::ConnectionClosed
                | ClientError::Timeout
                | ClientError::TlsHandshake(_)
        )
    }

    /// Returns whether the server rejected the request.
    pub fn is_remote(&self) -> bool {
        matches!(self, ClientError::Remote(_))
    }
}
