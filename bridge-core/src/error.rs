//! Error types for bridge-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::TxState;

/// All errors that can arise from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database file could not be opened.
    #[error("failed to open database at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// The store mutex was poisoned by a panicking holder.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// A state change the transaction state machine does not allow.
    #[error("invalid transaction state transition to {to}")]
    InvalidTransition { to: TxState },

    /// A queued fact record could not be encoded or decoded.
    #[error("invalid fact backlog record: {0}")]
    Record(#[from] serde_json::Error),

    /// A fact backlog row names a fact family this build does not know.
    #[error("unknown fact backlog kind {0:?}")]
    UnknownBacklogKind(String),

    /// An insert into `transactions` produced no row id.
    ///
    /// This is an invariant violation, not an ordinary failure; callers must
    /// stop instead of retrying.
    #[error("expected transaction id after insert (hash {hash})")]
    MissingInsertId { hash: String },
}

impl StoreError {
    /// Whether the error signals a broken invariant rather than a retryable failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::MissingInsertId { .. })
    }
}
