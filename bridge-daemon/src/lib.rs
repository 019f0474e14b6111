//! Daemon runtime: the fact sync loop and the block reconcile loop.
//!
//! Chain access is supplied by the embedding binary through
//! [`Collaborators`]; see [`run`] and [`start_blocking`].

pub mod block_source;
pub mod config;
mod error;
pub mod job;
pub mod reconcile;
mod runtime;
pub mod schedule;

pub use block_source::{
    Block, BlockFeed, BlockSource, BlockSourceFactory, BlockTransaction, ChannelBlockSource,
    TxStatus,
};
pub use config::BridgeConfig;
pub use error::DaemonError;
pub use job::{BlockReconcileJob, FactSyncJob, RecurringJob, Supervisor};
pub use reconcile::{BlockStreamConsumer, ReconcileReport, ReconcileSettings};
pub use runtime::{init_tracing, run, start_blocking, Collaborators, LogFormat};
pub use schedule::{Schedule, Ticker};
