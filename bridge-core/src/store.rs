//! SQLite-backed relational store.
//!
//! # Tables
//!
//! ```text
//! ethereum_blockchain(id PK, latest_processed_block_number)   single row, id = 1
//! transactions(id PK, created, updated, modified_by, transaction_hash, transaction_state_id)
//! user_data(id PK, invite_url_hash, account, updated_at, validated, transaction_id FK)
//! project_data(id PK, name, updated_at, passport_address, transaction_id FK)
//! mentorship(user_id, mentoree_id, transaction_id FK)
//! fact_backlog(id PK, kind, entity_id, record)                UNIQUE (kind, entity_id)
//! ```
//!
//! `fact_backlog` lists the entities whose ledger facts have not yet been
//! seen to match their local record. The synchronizer queues every entity it
//! touches; the fact writer drains an entry once the ledger agrees.
//!
//! # API pattern
//!
//! Every SQL statement lives on [`StoreTx`]. A unit of work opens one with
//! [`Store::with_transaction`]; the transaction commits when the closure
//! returns `Ok` and rolls back on `Err` (or on panic, when it is dropped).
//! The single-statement helpers on [`Store`] are thin wrappers that run one
//! [`StoreTx`] method in its own transaction.
//!
//! The closure must not call back into the same [`Store`]: the connection
//! mutex is held for its whole duration.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use serde::Serialize;

use crate::error::StoreError;
use crate::types::{
    Address, FactTarget, Project, ProjectId, Relation, Transaction, TransactionId, TxHash,
    TxState, User, UserId,
};

/// Fixed key of the block cursor row in `ethereum_blockchain`.
pub const CURSOR_ID: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS transactions (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    created              TEXT NOT NULL,
    updated              TEXT NOT NULL,
    modified_by          TEXT NOT NULL,
    transaction_hash     TEXT NOT NULL,
    transaction_state_id INTEGER NOT NULL CHECK (transaction_state_id IN (1, 2, 3))
);
CREATE INDEX IF NOT EXISTS idx_transactions_hash ON transactions(transaction_hash);
CREATE INDEX IF NOT EXISTS idx_transactions_state ON transactions(transaction_state_id);

CREATE TABLE IF NOT EXISTS ethereum_blockchain (
    id                            INTEGER PRIMARY KEY,
    latest_processed_block_number INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS user_data (
    id              INTEGER PRIMARY KEY,
    invite_url_hash TEXT NOT NULL DEFAULT '',
    account         TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    validated       INTEGER NOT NULL DEFAULT 0,
    transaction_id  INTEGER REFERENCES transactions(id)
);

CREATE TABLE IF NOT EXISTS project_data (
    id               INTEGER PRIMARY KEY,
    name             TEXT NOT NULL,
    updated_at       TEXT NOT NULL,
    passport_address TEXT NOT NULL DEFAULT '',
    transaction_id   INTEGER REFERENCES transactions(id)
);

CREATE TABLE IF NOT EXISTS mentorship (
    user_id        INTEGER NOT NULL,
    mentoree_id    INTEGER NOT NULL,
    transaction_id INTEGER REFERENCES transactions(id)
);
CREATE INDEX IF NOT EXISTS idx_mentorship_user ON mentorship(user_id);

CREATE TABLE IF NOT EXISTS fact_backlog (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    kind      TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    record    TEXT NOT NULL DEFAULT '',
    UNIQUE (kind, entity_id)
);
";

const TRANSACTION_COLUMNS: &str =
    "t.id, t.transaction_hash, t.transaction_state_id, t.created, t.updated, t.modified_by";

/// Number of tracked transactions per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransactionCounts {
    pub in_progress: u64,
    pub successful: u64,
    pub failed: u64,
}

impl TransactionCounts {
    pub fn total(&self) -> u64 {
        self.in_progress + self.successful + self.failed
    }
}

/// Entities with outstanding facts, in queue order per family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactBacklog {
    /// Loaded from `project_data`, so passports deployed since queueing show up.
    pub projects: Vec<Project>,
    /// Users whose mentor-list fact is outstanding.
    pub mentor_lists: Vec<User>,
    pub users: Vec<User>,
}

impl FactBacklog {
    pub fn len(&self) -> usize {
        self.projects.len() + self.mentor_lists.len() + self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// 1. Store handle
// ---------------------------------------------------------------------------

/// Shared handle to the bridge database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database file at `path` and ensure the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database (tests and dry runs).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Run `f` inside one database transaction.
    ///
    /// Commits when `f` returns `Ok`; otherwise the transaction is rolled back
    /// and the error returned unchanged.
    pub fn with_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StoreError::from)?;
        let store_tx = StoreTx { tx };
        let value = f(&store_tx)?;
        store_tx.tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    // -- single-statement conveniences -------------------------------------

    pub fn max_user_updated_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.with_transaction(|tx| tx.max_user_updated_at())
    }

    pub fn max_project_updated_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.with_transaction(|tx| tx.max_project_updated_at())
    }

    pub fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.with_transaction(|tx| tx.get_user(id))
    }

    pub fn get_project(&self, id: ProjectId) -> Result<Option<Project>, StoreError> {
        self.with_transaction(|tx| tx.get_project(id))
    }

    pub fn mentoree_ids(&self, user: UserId) -> Result<Vec<UserId>, StoreError> {
        self.with_transaction(|tx| tx.mentoree_ids(user))
    }

    pub fn set_passport_address(
        &self,
        project: ProjectId,
        address: &Address,
    ) -> Result<(), StoreError> {
        self.with_transaction(|tx| tx.set_passport_address(project, address))
    }

    /// Insert an InProgress transaction for `hash` and link it from `target`,
    /// atomically.
    pub fn record_transaction(
        &self,
        target: FactTarget,
        hash: &TxHash,
        modified_by: &str,
    ) -> Result<TransactionId, StoreError> {
        self.with_transaction(|tx| {
            let id = tx.insert_transaction(hash, modified_by, Utc::now())?;
            tx.link_transaction(target, id)?;
            Ok(id)
        })
    }

    pub fn linked_transaction(
        &self,
        target: FactTarget,
    ) -> Result<Option<Transaction>, StoreError> {
        self.with_transaction(|tx| tx.linked_transaction(target))
    }

    pub fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        self.with_transaction(|tx| tx.get_transaction(id))
    }

    pub fn transactions_by_hash(&self, hash: &TxHash) -> Result<Vec<Transaction>, StoreError> {
        self.with_transaction(|tx| tx.transactions_by_hash(hash))
    }

    pub fn transaction_counts(&self) -> Result<TransactionCounts, StoreError> {
        self.with_transaction(|tx| tx.transaction_counts())
    }

    pub fn delete_finalized_unreferenced_transactions(&self) -> Result<usize, StoreError> {
        self.with_transaction(|tx| tx.delete_finalized_unreferenced_transactions())
    }

    pub fn fact_backlog(&self) -> Result<FactBacklog, StoreError> {
        self.with_transaction(|tx| tx.fact_backlog())
    }

    pub fn settle_fact(&self, target: FactTarget) -> Result<bool, StoreError> {
        self.with_transaction(|tx| tx.settle_fact(target))
    }

    pub fn latest_processed_block(&self) -> Result<Option<u64>, StoreError> {
        self.with_transaction(|tx| tx.latest_processed_block())
    }

    pub fn set_latest_processed_block(&self, block: u64) -> Result<(), StoreError> {
        self.with_transaction(|tx| tx.set_latest_processed_block(block))
    }
}

// ---------------------------------------------------------------------------
// 2. Transaction-scoped operations
// ---------------------------------------------------------------------------

/// An open database transaction. Created by [`Store::with_transaction`].
pub struct StoreTx<'conn> {
    tx: rusqlite::Transaction<'conn>,
}

impl StoreTx<'_> {
    // -- high-water marks ---------------------------------------------------

    pub fn max_user_updated_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let max = self
            .tx
            .query_row("SELECT MAX(updated_at) FROM user_data", [], |row| row.get(0))?;
        Ok(max)
    }

    pub fn max_project_updated_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let max = self
            .tx
            .query_row("SELECT MAX(updated_at) FROM project_data", [], |row| row.get(0))?;
        Ok(max)
    }

    // -- users & mentorships -----------------------------------------------

    /// Update the user row with `user.id`. Returns `false` when no such row exists.
    pub fn update_user(&self, user: &User) -> Result<bool, StoreError> {
        let changed = self.tx.execute(
            "UPDATE user_data
             SET invite_url_hash = ?1, account = ?2, updated_at = ?3, validated = ?4
             WHERE id = ?5",
            params![
                user.invite_url_hash,
                user.account,
                user.updated_at,
                user.validated,
                user.id
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO user_data (id, invite_url_hash, account, updated_at, validated)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id,
                user.invite_url_hash,
                user.account,
                user.updated_at,
                user.validated
            ],
        )?;
        Ok(())
    }

    /// Load a user row with its mentorees. Mentor relations are not persisted
    /// and come back empty.
    pub fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let user = self
            .tx
            .query_row(
                "SELECT id, account, invite_url_hash, validated, updated_at
                 FROM user_data WHERE id = ?1",
                params![id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        account: row.get(1)?,
                        invite_url_hash: row.get(2)?,
                        validated: row.get(3)?,
                        updated_at: row.get(4)?,
                        mentors: Vec::new(),
                        mentorees: Vec::new(),
                    })
                },
            )
            .optional()?;

        let Some(mut user) = user else {
            return Ok(None);
        };

        let mut stmt = self.tx.prepare(
            "SELECT m.mentoree_id, COALESCE(u.account, '')
             FROM mentorship m LEFT JOIN user_data u ON u.id = m.mentoree_id
             WHERE m.user_id = ?1
             ORDER BY m.mentoree_id",
        )?;
        user.mentorees = stmt
            .query_map(params![id], |row| {
                Ok(Relation {
                    user_id: row.get(0)?,
                    account: row.get(1)?,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(Some(user))
    }

    pub fn delete_mentorships(&self, user: UserId) -> Result<usize, StoreError> {
        Ok(self
            .tx
            .execute("DELETE FROM mentorship WHERE user_id = ?1", params![user])?)
    }

    pub fn insert_mentorship(&self, user: UserId, mentoree: UserId) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO mentorship (user_id, mentoree_id) VALUES (?1, ?2)",
            params![user, mentoree],
        )?;
        Ok(())
    }

    pub fn mentoree_ids(&self, user: UserId) -> Result<Vec<UserId>, StoreError> {
        let mut stmt = self
            .tx
            .prepare("SELECT mentoree_id FROM mentorship WHERE user_id = ?1 ORDER BY mentoree_id")?;
        let ids = stmt
            .query_map(params![user], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(ids)
    }

    // -- projects ----------------------------------------------------------

    /// Update name and timestamp of an existing project, leaving its passport
    /// address and transaction link untouched. Returns `false` when no such
    /// row exists.
    pub fn update_project(&self, project: &Project) -> Result<bool, StoreError> {
        let changed = self.tx.execute(
            "UPDATE project_data SET name = ?1, updated_at = ?2 WHERE id = ?3",
            params![project.name, project.updated_at, project.id],
        )?;
        Ok(changed > 0)
    }

    pub fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO project_data (id, name, updated_at, passport_address)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                project.id,
                project.name,
                project.updated_at,
                project.passport_address
            ],
        )?;
        Ok(())
    }

    pub fn get_project(&self, id: ProjectId) -> Result<Option<Project>, StoreError> {
        let project = self
            .tx
            .query_row(
                "SELECT id, name, updated_at, passport_address FROM project_data WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Project {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        updated_at: row.get(2)?,
                        passport_address: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(project)
    }

    pub fn set_passport_address(
        &self,
        project: ProjectId,
        address: &Address,
    ) -> Result<(), StoreError> {
        self.tx.execute(
            "UPDATE project_data SET passport_address = ?1 WHERE id = ?2",
            params![address, project],
        )?;
        Ok(())
    }

    // -- transactions ------------------------------------------------------

    /// Insert a new InProgress transaction row.
    ///
    /// Fails with [`StoreError::MissingInsertId`] if the insert yields no id.
    pub fn insert_transaction(
        &self,
        hash: &TxHash,
        modified_by: &str,
        now: DateTime<Utc>,
    ) -> Result<TransactionId, StoreError> {
        let id = self
            .tx
            .query_row(
                "INSERT INTO transactions
                     (created, updated, modified_by, transaction_hash, transaction_state_id)
                 VALUES (?1, ?1, ?2, ?3, ?4)
                 RETURNING id",
                params![now, modified_by, hash, TxState::InProgress],
                |row| row.get::<_, TransactionId>(0),
            )
            .optional()?;
        id.ok_or_else(|| StoreError::MissingInsertId {
            hash: hash.to_string(),
        })
    }

    /// Point the owning row(s) of `target` at `transaction`. Returns the
    /// number of rows linked.
    pub fn link_transaction(
        &self,
        target: FactTarget,
        transaction: TransactionId,
    ) -> Result<usize, StoreError> {
        let linked = match target {
            FactTarget::User(user) => self.tx.execute(
                "UPDATE user_data SET transaction_id = ?1 WHERE id = ?2",
                params![transaction, user],
            )?,
            FactTarget::Mentorships(user) => self.tx.execute(
                "UPDATE mentorship SET transaction_id = ?1 WHERE user_id = ?2",
                params![transaction, user],
            )?,
            FactTarget::Project(project) => self.tx.execute(
                "UPDATE project_data SET transaction_id = ?1 WHERE id = ?2",
                params![transaction, project],
            )?,
        };
        Ok(linked)
    }

    /// The transaction currently linked from `target`, if any. For mentorships
    /// the most recent link across the mentor's rows is returned.
    pub fn linked_transaction(
        &self,
        target: FactTarget,
    ) -> Result<Option<Transaction>, StoreError> {
        let (sql, id) = match target {
            FactTarget::User(user) => (
                format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions t
                     JOIN user_data u ON u.transaction_id = t.id WHERE u.id = ?1"
                ),
                user.0,
            ),
            FactTarget::Mentorships(user) => (
                format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions t
                     JOIN mentorship m ON m.transaction_id = t.id WHERE m.user_id = ?1
                     ORDER BY t.id DESC LIMIT 1"
                ),
                user.0,
            ),
            FactTarget::Project(project) => (
                format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions t
                     JOIN project_data p ON p.transaction_id = t.id WHERE p.id = ?1"
                ),
                project.0,
            ),
        };
        let found = self
            .tx
            .query_row(&sql, params![id], row_to_transaction)
            .optional()?;
        Ok(found)
    }

    pub fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions t WHERE t.id = ?1");
        let found = self
            .tx
            .query_row(&sql, params![id], row_to_transaction)
            .optional()?;
        Ok(found)
    }

    pub fn transactions_by_hash(&self, hash: &TxHash) -> Result<Vec<Transaction>, StoreError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions t
             WHERE t.transaction_hash = ?1 ORDER BY t.id"
        );
        let mut stmt = self.tx.prepare(&sql)?;
        let rows = stmt
            .query_map(params![hash], row_to_transaction)?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    pub fn transaction_counts(&self) -> Result<TransactionCounts, StoreError> {
        let mut stmt = self.tx.prepare(
            "SELECT transaction_state_id, COUNT(*) FROM transactions
             GROUP BY transaction_state_id",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, TxState>(0)?, row.get::<_, u64>(1)?)))?;

        let mut counts = TransactionCounts::default();
        for row in rows {
            let (state, count) = row?;
            match state {
                TxState::InProgress => counts.in_progress = count,
                TxState::Successful => counts.successful = count,
                TxState::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }

    /// Move every InProgress row whose hash is in `hashes` to `state`.
    ///
    /// Rows in any other state are left alone, which makes re-applying the
    /// same block a no-op. Returns the number of rows updated.
    pub fn update_transaction_states(
        &self,
        hashes: &[TxHash],
        state: TxState,
        modified_by: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        if !TxState::InProgress.can_transition_to(state) {
            return Err(StoreError::InvalidTransition { to: state });
        }
        if hashes.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; hashes.len()].join(", ");
        let sql = format!(
            "UPDATE transactions
             SET transaction_state_id = ?, updated = ?, modified_by = ?
             WHERE transaction_state_id = ? AND transaction_hash IN ({placeholders})"
        );

        let mut args: Vec<&dyn ToSql> = vec![&state, &now, &modified_by, &TxState::InProgress];
        args.extend(hashes.iter().map(|h| h as &dyn ToSql));

        Ok(self.tx.execute(&sql, params_from_iter(args))?)
    }

    /// Delete Successful transactions that no user, project or mentorship row
    /// references any more. Returns the number of rows deleted.
    pub fn delete_finalized_unreferenced_transactions(&self) -> Result<usize, StoreError> {
        let deleted = self.tx.execute(
            "DELETE FROM transactions
             WHERE transaction_state_id = ?1
               AND NOT EXISTS (SELECT 1 FROM user_data u WHERE u.transaction_id = transactions.id)
               AND NOT EXISTS (SELECT 1 FROM project_data p WHERE p.transaction_id = transactions.id)
               AND NOT EXISTS (SELECT 1 FROM mentorship m WHERE m.transaction_id = transactions.id)",
            params![TxState::Successful],
        )?;
        Ok(deleted)
    }

    // -- fact backlog ------------------------------------------------------

    /// Queue the project fact of `project`. Already queued projects keep
    /// their place.
    pub fn enqueue_project_fact(&self, project: ProjectId) -> Result<(), StoreError> {
        self.enqueue(FactTarget::Project(project), "")
    }

    /// Queue the user and mentor-list facts of `user`, replacing any record
    /// queued earlier.
    pub fn enqueue_user_facts(&self, user: &User) -> Result<(), StoreError> {
        let record = serde_json::to_string(user)?;
        self.enqueue(FactTarget::Mentorships(user.id), &record)?;
        self.enqueue(FactTarget::User(user.id), &record)
    }

    fn enqueue(&self, target: FactTarget, record: &str) -> Result<(), StoreError> {
        let (kind, id) = backlog_key(target);
        self.tx.execute(
            "INSERT INTO fact_backlog (kind, entity_id, record) VALUES (?1, ?2, ?3)
             ON CONFLICT (kind, entity_id) DO UPDATE SET record = excluded.record",
            params![kind, id, record],
        )?;
        Ok(())
    }

    pub fn fact_backlog(&self) -> Result<FactBacklog, StoreError> {
        let mut stmt = self
            .tx
            .prepare("SELECT kind, entity_id, record FROM fact_backlog ORDER BY id")?;
        let rows: Vec<(String, i64, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<_, _>>()?;

        let mut backlog = FactBacklog::default();
        for (kind, id, record) in rows {
            match kind.as_str() {
                BACKLOG_PROJECT => {
                    if let Some(project) = self.get_project(ProjectId(id))? {
                        backlog.projects.push(project);
                    }
                }
                BACKLOG_MENTORSHIPS => backlog.mentor_lists.push(serde_json::from_str(&record)?),
                BACKLOG_USER => backlog.users.push(serde_json::from_str(&record)?),
                other => return Err(StoreError::UnknownBacklogKind(other.to_string())),
            }
        }
        Ok(backlog)
    }

    /// Drop `target` from the backlog. Returns `false` if it was not queued.
    pub fn settle_fact(&self, target: FactTarget) -> Result<bool, StoreError> {
        let (kind, id) = backlog_key(target);
        let removed = self.tx.execute(
            "DELETE FROM fact_backlog WHERE kind = ?1 AND entity_id = ?2",
            params![kind, id],
        )?;
        Ok(removed > 0)
    }

    // -- block cursor ------------------------------------------------------

    pub fn latest_processed_block(&self) -> Result<Option<u64>, StoreError> {
        let block = self
            .tx
            .query_row(
                "SELECT latest_processed_block_number FROM ethereum_blockchain WHERE id = ?1",
                params![CURSOR_ID],
                |row| row.get(0),
            )
            .optional()?;
        Ok(block)
    }

    /// Persist the cursor. A value lower than the stored one is ignored, so
    /// the cursor never moves backwards.
    pub fn set_latest_processed_block(&self, block: u64) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO ethereum_blockchain (id, latest_processed_block_number)
             VALUES (?1, ?2)
             ON CONFLICT (id) DO UPDATE SET latest_processed_block_number =
                 MAX(latest_processed_block_number, excluded.latest_processed_block_number)",
            params![CURSOR_ID, block],
        )?;
        Ok(())
    }
}

const BACKLOG_PROJECT: &str = "project";
const BACKLOG_MENTORSHIPS: &str = "mentorees";
const BACKLOG_USER: &str = "user";

fn backlog_key(target: FactTarget) -> (&'static str, i64) {
    match target {
        FactTarget::Project(id) => (BACKLOG_PROJECT, id.0),
        FactTarget::Mentorships(id) => (BACKLOG_MENTORSHIPS, id.0),
        FactTarget::User(id) => (BACKLOG_USER, id.0),
    }
}

fn row_to_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        id: row.get(0)?,
        hash: row.get(1)?,
        state: row.get(2)?,
        created: row.get(3)?,
        updated: row.get(4)?,
        modified_by: row.get(5)?,
    })
}

// ---------------------------------------------------------------------------
// 3. SQL conversions for domain types
// ---------------------------------------------------------------------------

macro_rules! sql_id {
    ($ty:ident) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map($ty)
            }
        }
    };
}

sql_id!(UserId);
sql_id!(ProjectId);
sql_id!(TransactionId);

impl ToSql for Address {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Address {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        String::column_result(value).map(Address::from)
    }
}

impl ToSql for TxHash {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TxHash {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        String::column_result(value).map(TxHash::from)
    }
}

impl ToSql for TxState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.id()))
    }
}

impl FromSql for TxState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let id = i64::column_result(value)?;
        TxState::from_id(id).ok_or(FromSqlError::OutOfRange(id))
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> Store {
        Store::open_in_memory().expect("in-memory store")
    }

    fn user(id: i64, account: &str) -> User {
        User {
            id: UserId(id),
            account: Address::from(account),
            invite_url_hash: format!("invite-{id}"),
            validated: true,
            updated_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            mentors: vec![],
            mentorees: vec![],
        }
    }

    #[test]
    fn schema_is_idempotent() {
        let s = store();
        let conn = s.lock().expect("lock");
        conn.execute_batch(SCHEMA).expect("re-applying schema");
    }

    #[test]
    fn with_transaction_rolls_back_on_error() {
        let s = store();
        let result: Result<(), StoreError> = s.with_transaction(|tx| {
            tx.insert_user(&user(1, "0xaa"))?;
            Err(StoreError::LockPoisoned)
        });
        assert!(result.is_err());
        assert!(s.get_user(UserId(1)).expect("get").is_none());
    }

    #[test]
    fn update_user_reports_missing_row() {
        let s = store();
        let updated = s
            .with_transaction(|tx| tx.update_user(&user(5, "0xbb")))
            .expect("update");
        assert!(!updated);
    }

    #[test]
    fn insert_transaction_starts_in_progress() {
        let s = store();
        let id = s
            .with_transaction(|tx| tx.insert_transaction(&TxHash::from("0xABC"), "tester", Utc::now()))
            .expect("insert");
        let row = s.get_transaction(id).expect("get").expect("row");
        assert_eq!(row.state, TxState::InProgress);
        assert_eq!(row.hash.as_str(), "0xabc");
        assert_eq!(row.modified_by, "tester");
    }

    #[test]
    fn update_to_in_progress_is_rejected() {
        let s = store();
        let err = s
            .with_transaction(|tx| {
                tx.update_transaction_states(&[TxHash::from("0x1")], TxState::InProgress, "x", Utc::now())
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[test]
    fn missing_insert_id_is_fatal() {
        let err = StoreError::MissingInsertId { hash: "0x1".into() };
        assert!(err.is_fatal());
        assert!(!StoreError::LockPoisoned.is_fatal());
        assert!(err.to_string().contains("expected transaction id after insert"));
    }
}
