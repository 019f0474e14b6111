//! Ledger fact writer.
//!
//! For each candidate entity and fact family:
//!
//! 1. Build the desired payload from the local record.
//! 2. Read the stored payload from the identity contract (empty on not-found
//!    or on any read/decode error).
//! 3. Skip when [`Fact::matches`] says nothing changed, and drop the entity
//!    from the fact backlog.
//! 4. Skip while the entity's previous write for the family is InProgress.
//! 5. Write the envelope and record an InProgress transaction linked to the
//!    entity.
//!
//! Every outcome other than "unchanged" leaves the entity queued, so failed,
//! deferred and unconfirmed writes are looked at again on the next pass.
//! A failed ledger write only affects its own entity. Store errors and
//! passport deployment errors abort the pass.

use bridge_core::{Address, FactTarget, Project, Store, TransactionId, TxHash, TxState, User};

use crate::error::SyncError;
use crate::facts::{decode_payload, Fact, FactKey, MentorFact, ProjectFact, SchemaSet, UserFact};
use crate::ledger::{LedgerClient, LedgerError};

// ---------------------------------------------------------------------------
// Write result
// ---------------------------------------------------------------------------

/// Outcome of one fact for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// The fact was written and an InProgress transaction recorded.
    Written {
        target: FactTarget,
        hash: TxHash,
        transaction: TransactionId,
    },
    /// The stored fact already matches the local record. The entity left the
    /// backlog.
    Unchanged { target: FactTarget },
    /// A previous write for this fact is still awaiting confirmation.
    Pending {
        target: FactTarget,
        transaction: TransactionId,
    },
    /// The write was not attempted or was rejected; retried on a later pass.
    Failed { target: FactTarget, reason: String },
}

impl WriteResult {
    pub fn target(&self) -> FactTarget {
        match self {
            WriteResult::Written { target, .. }
            | WriteResult::Unchanged { target }
            | WriteResult::Pending { target, .. }
            | WriteResult::Failed { target, .. } => *target,
        }
    }
}

/// Addresses and schema locations the writer needs.
#[derive(Debug, Clone)]
pub struct WriterSettings {
    /// Passport holding user and mentor-list facts.
    pub did_address: Address,
    pub passport_factory: Address,
    pub schemas: SchemaSet,
}

enum Decision {
    Unchanged,
    Pending(TransactionId),
    Write,
}

// ---------------------------------------------------------------------------
// FactWriter
// ---------------------------------------------------------------------------

pub struct FactWriter<'a> {
    store: &'a Store,
    ledger: &'a dyn LedgerClient,
    settings: &'a WriterSettings,
}

impl<'a> FactWriter<'a> {
    pub fn new(store: &'a Store, ledger: &'a dyn LedgerClient, settings: &'a WriterSettings) -> Self {
        Self {
            store,
            ledger,
            settings,
        }
    }

    /// Write project facts. Projects that get a passport deployed are
    /// updated in place.
    pub fn write_project_facts(
        &self,
        projects: &mut [Project],
    ) -> Result<Vec<WriteResult>, SyncError> {
        let mut results = Vec::with_capacity(projects.len());
        for project in projects.iter_mut() {
            results.push(self.write_project_fact(project)?);
        }
        Ok(results)
    }

    pub fn write_mentor_facts(&self, users: &[User]) -> Result<Vec<WriteResult>, SyncError> {
        let mut results = Vec::with_capacity(users.len());
        for user in users {
            let target = FactTarget::Mentorships(user.id);
            let key = FactKey::mentorees(&user.account);
            let desired = MentorFact::from(user);
            let did = &self.settings.did_address;
            let result = match self.decide(target, did, &key, &desired)? {
                Decision::Unchanged => self.settle(target)?,
                Decision::Pending(transaction) => WriteResult::Pending {
                    target,
                    transaction,
                },
                Decision::Write => self.commit(target, did, &key, desired)?,
            };
            results.push(result);
        }
        Ok(results)
    }

    pub fn write_user_facts(&self, users: &[User]) -> Result<Vec<WriteResult>, SyncError> {
        let mut results = Vec::with_capacity(users.len());
        for user in users {
            let target = FactTarget::User(user.id);
            let key = match FactKey::user(&user.account) {
                Ok(key) => key,
                Err(err) => {
                    // Retrying cannot help; a corrected account is queued again by the sync.
                    tracing::warn!("{target}: {err}");
                    self.store.settle_fact(target)?;
                    results.push(WriteResult::Failed {
                        target,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            let desired = UserFact::from(user);
            let did = &self.settings.did_address;
            let result = match self.decide(target, did, &key, &desired)? {
                Decision::Unchanged => self.settle(target)?,
                Decision::Pending(transaction) => WriteResult::Pending {
                    target,
                    transaction,
                },
                Decision::Write => self.commit(target, did, &key, desired)?,
            };
            results.push(result);
        }
        Ok(results)
    }

    fn write_project_fact(&self, project: &mut Project) -> Result<WriteResult, SyncError> {
        let target = FactTarget::Project(project.id);
        let key = FactKey::project();
        let desired = ProjectFact::from(&*project);
        match self.decide(target, &project.passport_address, &key, &desired)? {
            Decision::Unchanged => return self.settle(target),
            Decision::Pending(transaction) => {
                return Ok(WriteResult::Pending {
                    target,
                    transaction,
                })
            }
            Decision::Write => {}
        }
        self.ensure_passport(project)?;
        self.commit(target, &project.passport_address, &key, desired)
    }

    /// Read the stored payload under `key`.
    ///
    /// Not-found, read errors and undecodable bytes all yield the empty
    /// payload. A passport that does not exist yet is not read.
    pub fn read_baseline<F: Fact>(&self, target: FactTarget, passport: &Address, key: &FactKey) -> F {
        if passport.is_empty() {
            return F::default();
        }
        let requester = self.ledger.signer();
        match self.ledger.read_tx_data(passport, &requester, key) {
            Ok(bytes) => decode_payload(&bytes).unwrap_or_else(|err| {
                tracing::warn!("{target}: stored fact at {key} is not decodable: {err}");
                F::default()
            }),
            Err(LedgerError::NotFound) => F::default(),
            Err(err) => {
                tracing::warn!("{target}: reading fact at {key} failed: {err}");
                F::default()
            }
        }
    }

    fn decide<F: Fact>(
        &self,
        target: FactTarget,
        passport: &Address,
        key: &FactKey,
        desired: &F,
    ) -> Result<Decision, SyncError> {
        let baseline: F = self.read_baseline(target, passport, key);
        if desired.matches(&baseline) {
            tracing::debug!("{target}: unchanged");
            return Ok(Decision::Unchanged);
        }
        if let Some(linked) = self.store.linked_transaction(target)? {
            if linked.state == TxState::InProgress {
                tracing::debug!("{target}: transaction {} still in progress", linked.hash);
                return Ok(Decision::Pending(linked.id));
            }
        }
        Ok(Decision::Write)
    }

    fn settle(&self, target: FactTarget) -> Result<WriteResult, SyncError> {
        self.store.settle_fact(target)?;
        Ok(WriteResult::Unchanged { target })
    }

    fn ensure_passport(&self, project: &mut Project) -> Result<(), SyncError> {
        if !project.passport_address.is_empty() {
            return Ok(());
        }
        let address = self.ledger.deploy_passport(&self.settings.passport_factory)?;
        self.store.set_passport_address(project.id, &address)?;
        tracing::info!("project/{}: deployed passport {address}", project.id);
        project.passport_address = address;
        Ok(())
    }

    fn commit<F: Fact>(
        &self,
        target: FactTarget,
        passport: &Address,
        key: &FactKey,
        desired: F,
    ) -> Result<WriteResult, SyncError> {
        let envelope = self.settings.schemas.envelope(desired);
        let bytes = serde_json::to_vec(&envelope)?;
        let hash = match self.ledger.write_tx_data(passport, key, &bytes) {
            Ok(hash) => hash,
            Err(err) => {
                tracing::warn!("{target}: writing fact to {passport} failed: {err}");
                return Ok(WriteResult::Failed {
                    target,
                    reason: err.to_string(),
                });
            }
        };
        let signer = self.ledger.signer();
        let transaction = self
            .store
            .record_transaction(target, &hash, signer.as_str())?;
        tracing::info!("{target}: wrote fact, transaction {hash}");
        Ok(WriteResult::Written {
            target,
            hash,
            transaction,
        })
    }
}
