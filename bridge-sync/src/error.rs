//! Error types for bridge-sync.

use thiserror::Error;

use bridge_core::StoreError;

use crate::ledger::LedgerError;
use crate::source::SourceError;

/// All errors that can abort a fact synchronization pass.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the relational store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The update source could not deliver changes.
    #[error("update source error: {0}")]
    Source(#[from] SourceError),

    /// A ledger call that the pass cannot continue without (passport deployment).
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Fact payload serialization error.
    #[error("fact JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A fact key could not be derived from its input.
    #[error("invalid fact key '{input}': {reason}")]
    InvalidFactKey { input: String, reason: String },
}

impl SyncError {
    /// Whether the error is an invariant violation that must stop the process
    /// instead of being retried on the next pass.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Store(err) => err.is_fatal(),
            _ => false,
        }
    }
}
