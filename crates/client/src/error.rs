//! Error types for connector operations.

use std::time::Duration;

use scenerelay_shared::RemoteError;
use thiserror::Error;

/// Failure of a single request/response round trip.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    /// The remote answered with an `error` envelope
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// The socket closed while the request was in flight
    #[error("connection closed before a reply arrived")]
    ConnectionClosed,
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    /// The request could not be built; nothing was sent
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open socket to {url}: {reason}")]
    Open { url: String, reason: String },
    #[error("socket is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("not connected to the remote")]
    NotConnected,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("authentication failed: {0}")]
    Auth(RpcError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("scene not found: {0}")]
    SceneNotFound(String),
    #[error("synchronization failed: {0}")]
    Sync(String),
    #[error("unexpected payload from {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },
    /// The handshake was superseded by a disconnect or did not reach `connected`
    #[error("connection attempt did not complete")]
    ConnectAborted,
    #[error("timed out opening the socket after {0:?}")]
    ConnectTimeout(Duration),
    #[error("invalid socket url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ConnectorError {
    /// True when the caller asked for something that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConnectorError::SceneNotFound(_))
    }
}
