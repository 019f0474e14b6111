//! Local store synchronization: mirror changed records into SQLite.

use chrono::{DateTime, Utc};

use bridge_core::{FactTarget, Project, Store, StoreTx, TxState, User};

use crate::error::SyncError;
use crate::source::UpdateSource;

/// Records touched by one synchronization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncedBatch {
    pub users: Vec<User>,
    /// Carries the stored passport address of each project.
    pub projects: Vec<Project>,
}

impl SyncedBatch {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.projects.is_empty()
    }
}

/// Fetch everything changed since the stored high-water marks and apply it
/// in a single database transaction, queueing the facts of every touched
/// entity for the fact writer.
///
/// Any failure rolls back the whole batch.
pub fn sync_local_store(store: &Store, source: &dyn UpdateSource) -> Result<SyncedBatch, SyncError> {
    let users_since = store.max_user_updated_at()?.unwrap_or_else(epoch);
    let projects_since = store.max_project_updated_at()?.unwrap_or_else(epoch);

    let users = source.user_updates(users_since)?;
    let mut projects = source.project_updates(projects_since)?;
    tracing::debug!(
        "fetched {} user(s) since {users_since}, {} project(s) since {projects_since}",
        users.len(),
        projects.len()
    );

    store.with_transaction(|tx| {
        for project in projects.iter_mut() {
            upsert_project(tx, project)?;
            tx.enqueue_project_fact(project.id)?;
        }
        for user in &users {
            upsert_user(tx, user)?;
            replace_mentorships(tx, user)?;
            tx.enqueue_user_facts(user)?;
        }
        Ok::<_, SyncError>(())
    })?;

    if !users.is_empty() || !projects.is_empty() {
        tracing::info!(
            "synced {} user(s) and {} project(s) into the local store",
            users.len(),
            projects.len()
        );
    }
    Ok(SyncedBatch { users, projects })
}

fn epoch() -> DateTime<Utc> {
    // Unix epoch.
    DateTime::<Utc>::default()
}

fn upsert_project(tx: &StoreTx<'_>, project: &mut Project) -> Result<(), SyncError> {
    if !tx.update_project(project)? {
        tx.insert_project(project)?;
    }
    if let Some(stored) = tx.get_project(project.id)? {
        project.passport_address = stored.passport_address;
    }
    Ok(())
}

fn upsert_user(tx: &StoreTx<'_>, user: &User) -> Result<(), SyncError> {
    if !tx.update_user(user)? {
        tx.insert_user(user)?;
    }
    Ok(())
}

/// Replace the user's mentorship rows. An InProgress mentor-list transaction
/// stays linked to the new rows; finalized ones are released for collection.
fn replace_mentorships(tx: &StoreTx<'_>, user: &User) -> Result<(), SyncError> {
    let target = FactTarget::Mentorships(user.id);
    let linked = tx
        .linked_transaction(target)?
        .filter(|t| t.state == TxState::InProgress);
    tx.delete_mentorships(user.id)?;
    for mentoree in &user.mentorees {
        tx.insert_mentorship(user.id, mentoree.user_id)?;
    }
    if let Some(linked) = linked {
        tx.link_transaction(target, linked.id)?;
    }
    Ok(())
}
