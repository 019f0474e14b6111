//! Domain types for the ledger bridge.
//!
//! Identifiers are newtypes. Account addresses and transaction hashes are
//! normalized to lowercase on construction so that every comparison in the
//! store and in the block reconciler is case-insensitive by construction.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of a user in the external record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a project in the external record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(pub i64);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Row id of a tracked ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub i64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A hex account or contract address, always lowercase.
///
/// The empty address is meaningful: a project whose passport has not been
/// deployed yet carries `Address::default()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The address without its `0x` prefix.
    pub fn hex_digits(&self) -> &str {
        self.0.strip_prefix("0x").unwrap_or(&self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.0
    }
}

/// A ledger transaction hash in lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TxHash(String);

impl TxHash {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TxHash {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for TxHash {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<TxHash> for String {
    fn from(h: TxHash) -> Self {
        h.0
    }
}

// ---------------------------------------------------------------------------
// Transaction state machine
// ---------------------------------------------------------------------------

/// Lifecycle of a tracked ledger write.
///
/// `InProgress` is the only state a row is created in; `Successful` and
/// `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    InProgress,
    Successful,
    Failed,
}

impl TxState {
    pub const ALL: [TxState; 3] = [TxState::InProgress, TxState::Successful, TxState::Failed];

    /// Numeric id persisted in `transactions.transaction_state_id`.
    pub fn id(self) -> i64 {
        match self {
            TxState::InProgress => 1,
            TxState::Successful => 2,
            TxState::Failed => 3,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(TxState::InProgress),
            2 => Some(TxState::Successful),
            3 => Some(TxState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, TxState::InProgress)
    }

    pub fn can_transition_to(self, next: TxState) -> bool {
        matches!(
            (self, next),
            (TxState::InProgress, TxState::Successful) | (TxState::InProgress, TxState::Failed)
        )
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxState::InProgress => write!(f, "in_progress"),
            TxState::Successful => write!(f, "successful"),
            TxState::Failed => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One side of a mentorship, as carried on a [`User`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub user_id: UserId,
    pub account: Address,
}

/// A user mirrored from the update source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub account: Address,
    pub invite_url_hash: String,
    pub validated: bool,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub mentors: Vec<Relation>,
    #[serde(default)]
    pub mentorees: Vec<Relation>,
}

/// A project mirrored from the update source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub updated_at: DateTime<Utc>,
    /// Empty until the project's passport has been deployed.
    #[serde(default)]
    pub passport_address: Address,
}

/// A tracked ledger write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub hash: TxHash,
    pub state: TxState,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub modified_by: String,
}

/// The row a fact write is linked from.
///
/// Each variant names one fact family: the user fact hangs off `user_data`,
/// the mentor-list fact off every `mentorship` row of the mentor, and the
/// project fact off `project_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum FactTarget {
    User(UserId),
    Mentorships(UserId),
    Project(ProjectId),
}

impl fmt::Display for FactTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactTarget::User(id) => write!(f, "user/{id}"),
            FactTarget::Mentorships(id) => write!(f, "mentorees/{id}"),
            FactTarget::Project(id) => write!(f, "project/{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn address_is_lowercased_and_trimmed() {
        let a = Address::from("  0xAbCDef0123  ");
        assert_eq!(a.as_str(), "0xabcdef0123");
        assert_eq!(a.hex_digits(), "abcdef0123");
        assert!(Address::default().is_empty());
    }

    #[test]
    fn tx_hash_equality_ignores_case() {
        assert_eq!(TxHash::from("0xABC"), TxHash::from("0xabc"));
    }

    #[rstest]
    #[case(TxState::InProgress, TxState::Successful, true)]
    #[case(TxState::InProgress, TxState::Failed, true)]
    #[case(TxState::InProgress, TxState::InProgress, false)]
    #[case(TxState::Successful, TxState::Failed, false)]
    #[case(TxState::Failed, TxState::Successful, false)]
    #[case(TxState::Successful, TxState::InProgress, false)]
    fn state_transitions(#[case] from: TxState, #[case] to: TxState, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn state_ids_are_stable() {
        for state in TxState::ALL {
            assert_eq!(TxState::from_id(state.id()), Some(state));
        }
        assert_eq!(TxState::InProgress.id(), 1);
        assert_eq!(TxState::from_id(7), None);
        assert!(TxState::Failed.is_terminal());
        assert!(!TxState::InProgress.is_terminal());
    }

    #[test]
    fn fact_target_display() {
        assert_eq!(FactTarget::User(UserId(4)).to_string(), "user/4");
        assert_eq!(FactTarget::Mentorships(UserId(4)).to_string(), "mentorees/4");
        assert_eq!(FactTarget::Project(ProjectId(9)).to_string(), "project/9");
    }
}
