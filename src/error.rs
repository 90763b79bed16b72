//! Error taxonomy for the ledger core.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;

/// Errors from log, index, query and write-path operations.
///
/// Lookups that find nothing return `None` or an empty list; `NotFound` is
/// only raised by write paths that need an existing decision to act on.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid decision ID: {0}. Expected format: DEC-xxxx (4 hex chars)")]
    InvalidId(String),

    #[error("invalid type: {0}. Must be one of: product, process, constraint, learning")]
    InvalidType(String),

    #[error("invalid status: {0}. Must be one of: active, superseded")]
    InvalidStatus(String),

    #[error("invalid role: {0}. Must be one of: human, agent")]
    InvalidRole(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("decision {id} is already superseded by {by}")]
    AlreadySuperseded { id: String, by: String },

    #[error("invalid file pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("decision {0} not found")]
    NotFound(String),

    #[error("index schema version {0} is newer than this build supports; delete the index to rebuild it")]
    UnsupportedIndexVersion(i64),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("index error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LedgerError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors raised before any write touched the log or index.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidId(_)
                | Self::InvalidType(_)
                | Self::InvalidStatus(_)
                | Self::InvalidRole(_)
                | Self::MissingField(_)
                | Self::InvalidPattern { .. }
                | Self::AlreadySuperseded { .. }
        )
    }
}
