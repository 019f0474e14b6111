//! Ledger client contract.
//!
//! Chain RPC lives outside this crate; the fact writer talks to the identity
//! contracts only through [`LedgerClient`].

use thiserror::Error;

use bridge_core::{Address, TxHash};

use crate::facts::FactKey;

/// Errors reported by a [`LedgerClient`].
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No data is stored under the requested key. Not a failure for readers.
    #[error("fact not found")]
    NotFound,

    /// Network or RPC failure.
    #[error("ledger transport error: {0}")]
    Transport(String),

    /// The chain rejected the call (reverted, out of gas, bad signature, ...).
    #[error("ledger call rejected: {0}")]
    Rejected(String),
}

/// Synchronous access to identity (passport) contracts.
///
/// Calls are made from blocking worker threads and are not retried here; a
/// failing pass is retried as a whole on its next schedule.
pub trait LedgerClient: Send + Sync {
    /// Address of the identity that signs writes and deployments.
    fn signer(&self) -> Address;

    /// Read the bytes stored under `key` on `passport`, as provided by `requester`.
    fn read_tx_data(
        &self,
        passport: &Address,
        requester: &Address,
        key: &FactKey,
    ) -> Result<Vec<u8>, LedgerError>;

    /// Store `data` under `key` on `passport`. Returns the submitted transaction hash.
    fn write_tx_data(
        &self,
        passport: &Address,
        key: &FactKey,
        data: &[u8],
    ) -> Result<TxHash, LedgerError>;

    /// Deploy a new passport through `factory`. Returns the contract address.
    fn deploy_passport(&self, factory: &Address) -> Result<Address, LedgerError>;
}
