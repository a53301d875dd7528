use thiserror::Error;

/// Failure raised by a [`crate::transport::Connector`] or a live transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("transport refused connection: {0}")]
    Refused(String),
    #[error("transport is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("invalid connection options: {0}")]
    InvalidOptions(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("connection attempt timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("disconnected before the connection opened")]
    Disconnected,
    #[error("connection manager has shut down")]
    Closed,
    #[error("failed to serialize outbound message: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T, E = ManagerError> = std::result::Result<T, E>;
