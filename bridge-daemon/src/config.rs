//! Daemon configuration.
//!
//! Built by the caller (the CLI fills it from flags and `LEDGER_BRIDGE_*`
//! environment variables) and checked with [`BridgeConfig::validate`] before
//! any loop starts.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use bridge_core::Address;
use bridge_sync::{facts::DEFAULT_SCHEMA_BASE_URL, HttpUpdateSource, SchemaSet, WriterSettings};

use crate::error::DaemonError;
use crate::reconcile::{
    ReconcileSettings, DEFAULT_AUDIT_NAME, DEFAULT_CONFIRMATIONS, DEFAULT_START_BLOCK,
};
use crate::schedule::Schedule;

pub const DEFAULT_DB_FILE: &str = "ledger-bridge.db";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub db_path: PathBuf,
    pub source_url: String,
    pub source_token: String,
    /// Passport holding user and mentor-list facts.
    pub did_address: Address,
    pub passport_factory: Address,
    pub schema_base_url: String,
    pub default_start_block: u64,
    pub confirmations: u64,
    pub audit_name: String,
    /// Fact sync pipeline.
    pub processing: Schedule,
    /// Block reconciliation pipeline.
    pub validating: Schedule,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILE),
            source_url: String::new(),
            source_token: String::new(),
            did_address: Address::default(),
            passport_factory: Address::default(),
            schema_base_url: DEFAULT_SCHEMA_BASE_URL.to_string(),
            default_start_block: DEFAULT_START_BLOCK,
            confirmations: DEFAULT_CONFIRMATIONS,
            audit_name: DEFAULT_AUDIT_NAME.to_string(),
            processing: Schedule::default(),
            validating: Schedule::default(),
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<(), DaemonError> {
        if self.db_path.as_os_str().is_empty() {
            return Err(config_err("database path is empty"));
        }
        if !(self.source_url.starts_with("http://") || self.source_url.starts_with("https://")) {
            return Err(config_err(format!(
                "update source URL must be http(s), got '{}'",
                self.source_url
            )));
        }
        check_address("DID address", &self.did_address)?;
        check_address("passport factory address", &self.passport_factory)?;
        if self.schema_base_url.trim().is_empty() {
            return Err(config_err("schema base URL is empty"));
        }
        if self.audit_name.trim().is_empty() {
            return Err(config_err("audit name is empty"));
        }
        for (name, schedule) in [("processing", self.processing), ("validating", self.validating)] {
            if schedule.interval < Duration::from_secs(1) {
                return Err(config_err(format!("{name} interval must be at least one second")));
            }
        }
        Ok(())
    }

    /// Client for the configured record store API.
    pub fn update_source(&self) -> HttpUpdateSource {
        HttpUpdateSource::new(&self.source_url, &self.source_token)
    }

    pub fn writer_settings(&self) -> WriterSettings {
        WriterSettings {
            did_address: self.did_address.clone(),
            passport_factory: self.passport_factory.clone(),
            schemas: SchemaSet::new(&self.schema_base_url),
        }
    }

    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            default_start_block: self.default_start_block,
            confirmations: self.confirmations,
            audit_name: self.audit_name.clone(),
        }
    }
}

fn check_address(name: &str, address: &Address) -> Result<(), DaemonError> {
    let digits = address.hex_digits();
    let well_formed = address.as_str().starts_with("0x")
        && digits.len() == 40
        && digits.chars().all(|c| c.is_ascii_hexdigit());
    if well_formed {
        Ok(())
    } else {
        Err(config_err(format!("{name} '{address}' is not a 20-byte hex address")))
    }
}

fn config_err(message: impl Into<String>) -> DaemonError {
    DaemonError::Config(message.into())
}
