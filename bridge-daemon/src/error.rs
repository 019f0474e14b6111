use thiserror::Error;

use bridge_core::StoreError;
use bridge_sync::SyncError;

/// Error surface for the daemon runtime, its jobs and configuration.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("block source error: {0}")]
    BlockSource(String),

    #[error("{task} task join failure: {reason}")]
    TaskJoin { task: String, reason: String },

    #[error("runtime error: {context}: {source}")]
    Runtime {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl DaemonError {
    /// Whether the error must end the process rather than wait for the next
    /// scheduled pass.
    pub fn is_fatal(&self) -> bool {
        match self {
            DaemonError::Store(err) => err.is_fatal(),
            DaemonError::Sync(err) => err.is_fatal(),
            DaemonError::Config(_) | DaemonError::TaskJoin { .. } | DaemonError::Runtime { .. } => {
                true
            }
            DaemonError::BlockSource(_) => false,
        }
    }
}

pub(crate) fn join_err(task: impl Into<String>, err: tokio::task::JoinError) -> DaemonError {
    DaemonError::TaskJoin {
        task: task.into(),
        reason: err.to_string(),
    }
}
