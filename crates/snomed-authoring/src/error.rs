//! Error types for authoring operations.

use snomed_store::StoreError;
use thiserror::Error;

use crate::semantic::GraphError;

/// Errors raised by the authoring engines.
#[derive(Error, Debug)]
pub enum AuthoringError {
    /// The request is malformed or refers to values that do not exist.
    #[error("{0}")]
    Validation(String),

    /// The branches are not in a state that allows the operation.
    #[error("{0}")]
    State(String),

    /// A requested object does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Conflicts must be resolved before the operation can proceed.
    #[error("{0}")]
    Conflict(String),

    /// Versioned store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Hierarchy graph failure.
    #[error("Failed to update semantic index. {0}")]
    Graph(#[from] GraphError),

    /// A concept could not be written to or read from the temp store.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A background task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for AuthoringError {
    fn from(err: tokio::task::JoinError) -> Self {
        AuthoringError::Task(err.to_string())
    }
}

/// How a caller should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad input.
    Validation,
    /// Valid input, wrong branch or review state.
    Precondition,
    /// Missing object.
    NotFound,
    /// Unresolved conflicts.
    Conflict,
    /// Failure inside the server.
    Internal,
}

impl AuthoringError {
    /// Category of the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::State(_) => ErrorCategory::Precondition,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::Conflict(_) => ErrorCategory::Conflict,
            Self::Store(err) => match err {
                StoreError::BranchNotFound { .. } | StoreError::ParentNotFound { .. } => {
                    ErrorCategory::NotFound
                }
                StoreError::BranchExists { .. } | StoreError::TooManyTerms { .. } => {
                    ErrorCategory::Validation
                }
                StoreError::BranchLocked { .. } => ErrorCategory::Conflict,
                StoreError::Listener(_) | StoreError::Rf2(_) => ErrorCategory::Internal,
            },
            Self::Graph(_) | Self::Serialization(_) | Self::Task(_) => ErrorCategory::Internal,
        }
    }

    /// HTTP status a server front end would answer with.
    pub fn status_code(&self) -> u16 {
        match self.category() {
            ErrorCategory::Validation => 400,
            ErrorCategory::Precondition => 409,
            ErrorCategory::NotFound => 404,
            ErrorCategory::Conflict => 409,
            ErrorCategory::Internal => 500,
        }
    }
}

/// Result type for authoring operations.
pub type AuthoringResult<T> = Result<T, AuthoringError>;
