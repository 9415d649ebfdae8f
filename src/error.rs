use std::time::Duration;

use thiserror::Error;

/// Failures reported by a broker link
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Broker answered CONNACK with a non-success return code
    #[error("connection refused by broker: {0}")]
    Refused(String),
    #[error("network error: {0}")]
    Io(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("no CONNACK within {0:?}")]
    Timeout(Duration),
    #[error("link closed")]
    Closed,
    #[error("operation cancelled")]
    Cancelled,
}

/// Why a subscriber session could not be established
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),
    #[error("authentication rejected: {0}")]
    Rejected(String),
    #[error("protocol negotiation failed: {0}")]
    Protocol(String),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("connect cancelled")]
    Cancelled,
    #[error("session is already connecting or connected")]
    AlreadyActive,
}

impl From<TransportError> for ConnectError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Refused(code) => ConnectError::Rejected(code),
            TransportError::Io(msg) => ConnectError::Unreachable(msg),
            TransportError::Protocol(msg) => ConnectError::Protocol(msg),
            TransportError::Timeout(after) => ConnectError::Timeout(after),
            TransportError::Closed => ConnectError::Unreachable("link closed".to_string()),
            TransportError::Cancelled => ConnectError::Cancelled,
        }
    }
}

/// Failure of a one-shot publish
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("publish connection failed: {0}")]
    Connect(#[from] ConnectError),
    #[error("publish failed: {0}")]
    Publish(TransportError),
    #[error("publish cancelled")]
    Cancelled,
}

/// Misuse or failure of an established session
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is not connected")]
    NotConnected,
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("subscribe request failed: {0}")]
    Subscribe(TransportError),
}
