//! Ledger bridge core library: domain types, the relational store, errors.
//!
//! - [`types`]: identifiers, users, projects, transactions, the state machine
//! - [`store`]: SQLite persistence and the transaction tracker
//! - [`error`]: [`StoreError`]

pub mod error;
pub mod store;
pub mod types;

pub use error::StoreError;
pub use store::{FactBacklog, Store, StoreTx, TransactionCounts, CURSOR_ID};
pub use types::{
    Address, FactTarget, Project, ProjectId, Relation, Transaction, TransactionId, TxHash,
    TxState, User, UserId,
};
