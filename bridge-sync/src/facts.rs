//! Fact payloads, keys and equality.
//!
//! A fact is a JSON envelope `{"schema": <url>, "payload": <payload>}` stored
//! on an identity contract under a 32-byte key. Whether a write is needed is
//! decided by [`Fact::matches`], comparing canonical (sorted) payloads.

use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use bridge_core::{Address, Project, User};

use crate::error::SyncError;

pub const FACT_KEY_LEN: usize = 32;

/// Key of the project fact on a project's own passport.
pub const PROJECT_KEY: &str = "project";

/// Suffix appended to an account to derive its mentor-list key.
pub const MENTOREES_SUFFIX: &str = "_mentorees";

pub const DEFAULT_SCHEMA_BASE_URL: &str = "http://portal.mosoly.live";

// ---------------------------------------------------------------------------
// 1. Keys
// ---------------------------------------------------------------------------

/// A 32-byte storage key. Shorter inputs are copied into the start of a
/// zeroed key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FactKey([u8; FACT_KEY_LEN]);

impl FactKey {
    fn padded(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > FACT_KEY_LEN {
            return None;
        }
        let mut key = [0u8; FACT_KEY_LEN];
        key[..bytes.len()].copy_from_slice(bytes);
        Some(Self(key))
    }

    /// Key made of the UTF-8 bytes of `literal`.
    pub fn literal(literal: &str) -> Result<Self, SyncError> {
        Self::padded(literal.as_bytes()).ok_or_else(|| SyncError::InvalidFactKey {
            input: literal.to_string(),
            reason: format!("longer than {FACT_KEY_LEN} bytes"),
        })
    }

    /// Key made of the raw bytes of a hex address.
    pub fn from_address(address: &Address) -> Result<Self, SyncError> {
        let invalid = |reason: String| SyncError::InvalidFactKey {
            input: address.to_string(),
            reason,
        };
        let bytes = hex::decode(address.hex_digits()).map_err(|e| invalid(e.to_string()))?;
        if bytes.is_empty() {
            return Err(invalid("empty address".to_string()));
        }
        Self::padded(&bytes).ok_or_else(|| invalid(format!("longer than {FACT_KEY_LEN} bytes")))
    }

    /// Keccak-256 of `preimage`.
    pub fn hashed(preimage: &str) -> Self {
        Self(Keccak256::digest(preimage.as_bytes()).into())
    }

    pub fn project() -> Self {
        let mut key = [0u8; FACT_KEY_LEN];
        key[..PROJECT_KEY.len()].copy_from_slice(PROJECT_KEY.as_bytes());
        Self(key)
    }

    pub fn user(account: &Address) -> Result<Self, SyncError> {
        Self::from_address(account)
    }

    pub fn mentorees(account: &Address) -> Self {
        Self::hashed(&format!("{account}{MENTOREES_SUFFIX}"))
    }

    pub fn as_bytes(&self) -> &[u8; FACT_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for FactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FactKey(0x{})", hex::encode(self.0))
    }
}

impl fmt::Display for FactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// 2. Payloads
// ---------------------------------------------------------------------------

/// A payload type that can be notarized as a fact.
pub trait Fact: Serialize + DeserializeOwned + Default + fmt::Debug {
    /// File name of the payload's JSON schema, relative to the schema base URL.
    const SCHEMA_FILE: &'static str;

    /// Whether `self` and `baseline` describe the same fact.
    fn matches(&self, baseline: &Self) -> bool;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFact {
    #[serde(default)]
    pub name: String,
}

impl Fact for ProjectFact {
    const SCHEMA_FILE: &'static str = "project.json";

    fn matches(&self, baseline: &Self) -> bool {
        self.name == baseline.name
    }
}

impl From<&Project> for ProjectFact {
    fn from(project: &Project) -> Self {
        Self {
            name: project.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserFact {
    pub invite_url_hash: String,
    pub account: String,
    pub validated: bool,
    pub mentors: Vec<String>,
}

impl Fact for UserFact {
    const SCHEMA_FILE: &'static str = "user.json";

    fn matches(&self, baseline: &Self) -> bool {
        self.invite_url_hash == baseline.invite_url_hash
            && self.account == baseline.account
            && self.validated == baseline.validated
            && sorted(&self.mentors) == sorted(&baseline.mentors)
    }
}

impl From<&User> for UserFact {
    fn from(user: &User) -> Self {
        let mut mentors: Vec<String> = user
            .mentors
            .iter()
            .map(|m| m.account.to_string())
            .collect();
        mentors.sort();
        Self {
            invite_url_hash: user.invite_url_hash.clone(),
            account: user.account.to_string(),
            validated: user.validated,
            mentors,
        }
    }
}

/// The accounts a user mentors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MentorFact(pub Vec<String>);

impl Fact for MentorFact {
    const SCHEMA_FILE: &'static str = "mentorees.json";

    fn matches(&self, baseline: &Self) -> bool {
        sorted(&self.0) == sorted(&baseline.0)
    }
}

impl From<&User> for MentorFact {
    fn from(user: &User) -> Self {
        let mut accounts: Vec<String> = user
            .mentorees
            .iter()
            .map(|m| m.account.to_string())
            .collect();
        accounts.sort();
        Self(accounts)
    }
}

fn sorted(values: &[String]) -> Vec<&str> {
    let mut out: Vec<&str> = values.iter().map(String::as_str).collect();
    out.sort_unstable();
    out
}

// ---------------------------------------------------------------------------
// 3. Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactEnvelope<T> {
    pub schema: String,
    pub payload: T,
}

/// Resolves schema URLs for each fact type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSet {
    base_url: String,
}

impl SchemaSet {
    pub fn new(base_url: impl AsRef<str>) -> Self {
        Self {
            base_url: base_url.as_ref().trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for<F: Fact>(&self) -> String {
        format!("{}/{}", self.base_url, F::SCHEMA_FILE)
    }

    pub fn envelope<F: Fact>(&self, payload: F) -> FactEnvelope<F> {
        FactEnvelope {
            schema: self.url_for::<F>(),
            payload,
        }
    }
}

impl Default for SchemaSet {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEMA_BASE_URL)
    }
}

/// Decode stored fact bytes. Empty input is the empty payload.
pub fn decode_payload<F: Fact>(bytes: &[u8]) -> Result<F, serde_json::Error> {
    if bytes.iter().all(|b| *b == 0) {
        return Ok(F::default());
    }
    let envelope: FactEnvelope<F> = serde_json::from_slice(bytes)?;
    Ok(envelope.payload)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use bridge_core::{Relation, UserId};

    use super::*;

    fn user(account: &str, mentors: &[&str], mentorees: &[&str]) -> User {
        let rel = |a: &&str| Relation {
            user_id: UserId(0),
            account: Address::from(*a),
        };
        User {
            id: UserId(1),
            account: Address::from(account),
            invite_url_hash: "hash".to_string(),
            validated: true,
            updated_at: Utc::now(),
            mentors: mentors.iter().map(rel).collect(),
            mentorees: mentorees.iter().map(rel).collect(),
        }
    }

    #[test]
    fn project_key_is_zero_padded_literal() {
        let key = FactKey::project();
        assert_eq!(&key.as_bytes()[..7], b"project");
        assert!(key.as_bytes()[7..].iter().all(|b| *b == 0));
        assert_eq!(FactKey::literal("project").expect("literal"), key);
    }

    #[test]
    fn literal_longer_than_key_is_rejected() {
        let err = FactKey::literal(&"x".repeat(33)).unwrap_err();
        assert!(matches!(err, SyncError::InvalidFactKey { .. }));
    }

    #[test]
    fn user_key_holds_account_bytes_at_start() {
        let account = Address::from("0x00112233445566778899AABBCCDDEEFF00112233");
        let key = FactKey::user(&account).expect("key");
        assert_eq!(key.as_bytes()[0], 0x00);
        assert_eq!(key.as_bytes()[1], 0x11);
        assert_eq!(key.as_bytes()[19], 0x33);
        assert!(key.as_bytes()[20..].iter().all(|b| *b == 0));
    }

    #[test]
    fn user_key_rejects_non_hex_account() {
        assert!(FactKey::user(&Address::from("0xnothex")).is_err());
        assert!(FactKey::user(&Address::default()).is_err());
    }

    #[test]
    fn mentorees_key_is_keccak_of_account_and_suffix() {
        let account = Address::from("0xABC");
        let expected: [u8; 32] = Keccak256::digest(b"0xabc_mentorees").into();
        assert_eq!(FactKey::mentorees(&account).as_bytes(), &expected);
        assert_ne!(FactKey::mentorees(&account), FactKey::hashed("0xabc"));
    }

    #[test]
    fn user_fact_ignores_mentor_order() {
        let desired = UserFact::from(&user("0xa", &["0xc", "0xb"], &[]));
        assert_eq!(desired.mentors, vec!["0xb", "0xc"]);
        let baseline = UserFact {
            mentors: vec!["0xc".to_string(), "0xb".to_string()],
            ..desired.clone()
        };
        assert!(desired.matches(&baseline));
        let flipped = UserFact {
            validated: false,
            ..desired.clone()
        };
        assert!(!desired.matches(&flipped));
    }

    #[test]
    fn empty_mentor_lists_match() {
        let desired = MentorFact::from(&user("0xa", &[], &[]));
        assert!(desired.matches(&MentorFact::default()));
        assert!(!MentorFact(vec!["0xb".to_string()]).matches(&desired));
    }

    #[test]
    fn envelope_wire_format() {
        let schemas = SchemaSet::default();
        let envelope = schemas.envelope(ProjectFact {
            name: "X".to_string(),
        });
        let json = serde_json::to_string(&envelope).expect("encode");
        assert_eq!(
            json,
            r#"{"schema":"http://portal.mosoly.live/project.json","payload":{"name":"X"}}"#
        );

        let mentors = SchemaSet::new("https://schemas.example/").envelope(MentorFact(vec![
            "0xa".to_string(),
        ]));
        let json = serde_json::to_string(&mentors).expect("encode");
        assert_eq!(
            json,
            r#"{"schema":"https://schemas.example/mentorees.json","payload":["0xa"]}"#
        );
    }

    #[test]
    fn decode_payload_reads_envelope_and_treats_empty_as_default() {
        let stored = br#"{"schema":"s","payload":{"inviteUrlHash":"h","account":"0xa","validated":true,"mentors":["0xb"]}}"#;
        let fact: UserFact = decode_payload(stored).expect("decode");
        assert_eq!(fact.invite_url_hash, "h");
        assert_eq!(fact.mentors, vec!["0xb"]);

        let empty: MentorFact = decode_payload(&[]).expect("empty");
        assert!(empty.0.is_empty());
        assert!(decode_payload::<ProjectFact>(b"not json").is_err());
    }
}
