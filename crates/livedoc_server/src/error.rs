//! Error types for the live query server.

use crate::messages::QueryHandle;
use livedoc_core::CoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while serving a connection.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Error from the model layer (permissions, validation, store).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The connection was disconnected.
    #[error("connection closed")]
    ConnectionClosed,

    /// The handle does not name an open live query of this connection.
    #[error("unknown live query: {0}")]
    UnknownQuery(QueryHandle),

    /// A configured limit was reached.
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// Malformed request on the wire.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// I/O error on the transport.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if the caller caused this error.
    pub fn is_client_error(&self) -> bool {
        match self {
            ServerError::Core(err) => err.is_client_error(),
            ServerError::Io(_) => false,
            _ => true,
        }
    }

    /// Returns the stable kind name used on the wire.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::Core(CoreError::PermissionDenied { .. }) => ErrorKind::PermissionDenied,
            ServerError::Core(CoreError::Validation { .. }) => ErrorKind::Validation,
            ServerError::Core(CoreError::Store(_)) => ErrorKind::Store,
            ServerError::Core(CoreError::NotFound { .. }) => ErrorKind::NotFound,
            ServerError::Core(CoreError::UnknownModel { .. }) => ErrorKind::UnknownModel,
            ServerError::Core(CoreError::DuplicateModel { .. } | CoreError::InvalidModel { .. }) => {
                ErrorKind::Internal
            }
            ServerError::ConnectionClosed => ErrorKind::ConnectionClosed,
            ServerError::UnknownQuery(_) => ErrorKind::UnknownQuery,
            ServerError::LimitExceeded(_) => ErrorKind::LimitExceeded,
            ServerError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ServerError::Io(_) => ErrorKind::Internal,
        }
    }

    /// Converts the error into its wire form.
    pub fn to_wire(&self) -> WireError {
        WireError {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Error kinds reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A field or operation failed the permission check.
    PermissionDenied,
    /// Malformed query shape or payload.
    Validation,
    /// The document store failed.
    Store,
    /// Document does not exist.
    NotFound,
    /// No such model.
    UnknownModel,
    /// No such live query.
    UnknownQuery,
    /// Connection already closed.
    ConnectionClosed,
    /// Server limit reached.
    LimitExceeded,
    /// Malformed request.
    InvalidRequest,
    /// Anything else.
    Internal,
}

/// An error as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Stable kind.
    pub kind: ErrorKind,
    /// Human readable message.
    pub message: String,
}
