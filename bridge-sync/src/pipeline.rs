//! One fact pipeline pass: synchronize the local store, then write the facts
//! of everything in the store's fact backlog.
//!
//! The backlog outlives the pass. Entities whose write failed, was deferred
//! or is not yet confirmed are candidates again next time, even when the
//! update source has nothing new.
//!
//! Shared by the `ledger-bridge pull` command (sync only) and the daemon's
//! processing job (full pass).

use bridge_core::Store;

use crate::error::SyncError;
use crate::ledger::LedgerClient;
use crate::local::sync_local_store;
use crate::source::UpdateSource;
use crate::writer::{FactWriter, WriteResult, WriterSettings};

/// Collaborators of a pass.
#[derive(Clone, Copy)]
pub struct PassContext<'a> {
    pub store: &'a Store,
    pub source: &'a dyn UpdateSource,
    pub ledger: &'a dyn LedgerClient,
    pub settings: &'a WriterSettings,
}

/// Summary of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Records fetched from the update source in this pass.
    pub users_synced: usize,
    pub projects_synced: usize,
    pub writes: Vec<WriteResult>,
}

impl PassReport {
    pub fn written(&self) -> usize {
        self.count(|r| matches!(r, WriteResult::Written { .. }))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|r| matches!(r, WriteResult::Unchanged { .. }))
    }

    pub fn pending(&self) -> usize {
        self.count(|r| matches!(r, WriteResult::Pending { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|r| matches!(r, WriteResult::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&WriteResult) -> bool) -> usize {
        self.writes.iter().filter(|r| pred(r)).count()
    }
}

/// Run a full pass: local sync followed by project, mentor-list and user facts.
pub fn run(ctx: PassContext<'_>) -> Result<PassReport, SyncError> {
    let batch = sync_local_store(ctx.store, ctx.source)?;
    let report = PassReport {
        users_synced: batch.users.len(),
        projects_synced: batch.projects.len(),
        writes: write_backlog(ctx)?,
    };
    tracing::info!(
        "fact pass: {} user(s), {} project(s) synced; {} written, {} unchanged, {} pending, {} failed",
        report.users_synced,
        report.projects_synced,
        report.written(),
        report.unchanged(),
        report.pending(),
        report.failed()
    );
    Ok(report)
}

/// Write the facts of every queued entity, projects first, then mentor
/// lists, then users.
pub fn write_backlog(ctx: PassContext<'_>) -> Result<Vec<WriteResult>, SyncError> {
    let mut backlog = ctx.store.fact_backlog()?;
    if backlog.is_empty() {
        return Ok(Vec::new());
    }
    tracing::debug!("{} fact(s) queued", backlog.len());
    let writer = FactWriter::new(ctx.store, ctx.ledger, ctx.settings);

    let mut writes = writer.write_project_facts(&mut backlog.projects)?;
    writes.extend(writer.write_mentor_facts(&backlog.mentor_lists)?);
    writes.extend(writer.write_user_facts(&backlog.users)?);
    Ok(writes)
}
