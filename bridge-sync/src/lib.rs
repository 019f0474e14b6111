//! # bridge-sync
//!
//! The fact pipeline: mirror changed records from an [`UpdateSource`] into
//! the local store, derive facts from them, and write changed facts to the
//! ledger through a [`LedgerClient`].
//!
//! Call [`pipeline::run`] for a full pass, or [`sync_local_store`] to only
//! refresh the local store.

pub mod error;
pub mod facts;
pub mod ledger;
pub mod local;
pub mod pipeline;
pub mod source;
pub mod writer;

pub use error::SyncError;
pub use facts::{Fact, FactKey, MentorFact, ProjectFact, SchemaSet, UserFact};
pub use ledger::{LedgerClient, LedgerError};
pub use local::{sync_local_store, SyncedBatch};
pub use pipeline::{PassContext, PassReport};
pub use source::{HttpUpdateSource, SourceError, UpdateSource};
pub use writer::{FactWriter, WriteResult, WriterSettings};
