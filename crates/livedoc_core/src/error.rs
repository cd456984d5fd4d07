//! Error types for LiveDoc core.

use crate::document::DocumentId;
use crate::permission::Operation;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type for document store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a [`DocumentStore`](crate::store::DocumentStore) implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the document.
    #[error("store rejected document: {0}")]
    Rejected(String),
}

/// Errors that can occur in LiveDoc core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A field or operation failed the permission check.
    #[error("permission denied: {operation} on {model}.{field}")]
    PermissionDenied {
        /// Model the check ran against.
        model: String,
        /// Field that failed, or `*` for a model-level check.
        field: String,
        /// The operation that was attempted.
        operation: Operation,
    },

    /// Malformed query shape, unknown field or bad payload.
    #[error("validation failed: {message}")]
    Validation {
        /// Description of the problem.
        message: String,
    },

    /// The document store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Document does not exist.
    #[error("document not found: {id} in {model}")]
    NotFound {
        /// Model that was searched.
        model: String,
        /// The missing document.
        id: DocumentId,
    },

    /// A model with this name is already registered.
    #[error("model already registered: {name}")]
    DuplicateModel {
        /// Name of the model.
        name: String,
    },

    /// No model with this name is registered.
    #[error("unknown model: {name}")]
    UnknownModel {
        /// Name of the model.
        name: String,
    },

    /// Model definition is malformed.
    #[error("invalid model definition: {message}")]
    InvalidModel {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a permission denied error.
    pub fn permission_denied(
        model: impl Into<String>,
        field: impl Into<String>,
        operation: Operation,
    ) -> Self {
        Self::PermissionDenied {
            model: model.into(),
            field: field.into(),
            operation,
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(model: impl Into<String>, id: DocumentId) -> Self {
        Self::NotFound {
            model: model.into(),
            id,
        }
    }

    /// Creates an invalid model error.
    pub fn invalid_model(message: impl Into<String>) -> Self {
        Self::InvalidModel {
            message: message.into(),
        }
    }

    /// Returns true if the caller caused this error.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, CoreError::Store(_))
    }
}
