//! Error and configuration types for the store and RF2 import.

use thiserror::Error;

/// Errors that can occur while reading RF2 files.
#[derive(Error, Debug)]
pub enum Rf2Error {
    /// I/O error reading RF2 file.
    #[error("IO error reading RF2 file: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parsing error.
    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    /// Invalid SCTID format.
    #[error("Invalid SCTID format: {value}")]
    InvalidSctId {
        /// The invalid value that was encountered.
        value: String,
    },

    /// Invalid date format.
    #[error("Invalid date format: {value}")]
    InvalidDate {
        /// The invalid date value.
        value: String,
    },

    /// Invalid boolean value.
    #[error("Invalid boolean value: {value} (expected 0 or 1)")]
    InvalidBoolean {
        /// The invalid boolean value.
        value: String,
    },

    /// Invalid integer value.
    #[error("Invalid integer value: {value}")]
    InvalidInteger {
        /// The invalid integer value.
        value: String,
    },

    /// File not found.
    #[error("File not found: {path}")]
    FileNotFound {
        /// The path that was not found.
        path: String,
    },

    /// Directory not found.
    #[error("Directory not found: {path}")]
    DirectoryNotFound {
        /// The path that was not found.
        path: String,
    },

    /// Required file missing from the release.
    #[error("Required RF2 file not found: {file_type} in {directory}")]
    RequiredFileMissing {
        /// The type of file that was missing.
        file_type: String,
        /// The directory that was searched.
        directory: String,
    },

    /// Header has fewer columns than the record type needs.
    #[error("Invalid header: expected {expected} columns, found {found}")]
    InvalidHeader {
        /// Expected column count.
        expected: usize,
        /// Found column count.
        found: usize,
    },

    /// Unexpected column name.
    #[error("Unexpected column '{found}' at position {position}, expected '{expected}'")]
    UnexpectedColumn {
        /// The column position.
        position: usize,
        /// Expected column name.
        expected: String,
        /// Found column name.
        found: String,
    },
}

/// Result type for RF2 operations.
pub type Rf2Result<T> = Result<T, Rf2Error>;

/// Errors raised by the versioned store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No branch exists at the path.
    #[error("Branch '{path}' does not exist.")]
    BranchNotFound {
        /// Requested branch path.
        path: String,
    },

    /// A branch already exists at the path.
    #[error("Branch '{path}' already exists.")]
    BranchExists {
        /// Requested branch path.
        path: String,
    },

    /// A child branch was requested under a missing parent.
    #[error("Parent branch of '{path}' does not exist.")]
    ParentNotFound {
        /// Requested child path.
        path: String,
    },

    /// Another commit holds the branch lock.
    #[error("Branch '{path}' is locked by another commit.")]
    BranchLocked {
        /// Locked branch path.
        path: String,
    },

    /// A lookup asked for more ids than one query may carry.
    #[error("Query has {count} terms, the limit is {limit}.")]
    TooManyTerms {
        /// Number of ids requested.
        count: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// A commit listener refused the commit.
    #[error("Commit listener failed: {0}")]
    Listener(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// RF2 import failure.
    #[error(transparent)]
    Rf2(#[from] Rf2Error),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of ids one lookup may carry.
    pub max_terms_per_query: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_terms_per_query: 65_536,
        }
    }
}

impl StoreConfig {
    /// Reads `SNOMED_MAX_TERMS_PER_QUERY`, falling back to the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(limit) = std::env::var("SNOMED_MAX_TERMS_PER_QUERY")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.max_terms_per_query = limit;
        }
        config
    }
}

/// Configuration for RF2 import.
#[derive(Debug, Clone)]
pub struct Rf2Config {
    /// Whether to skip inactive rows.
    pub active_only: bool,
    /// Number of rows saved per batch.
    pub batch_size: usize,
}

impl Default for Rf2Config {
    fn default() -> Self {
        Self {
            active_only: false,
            batch_size: 10_000,
        }
    }
}
