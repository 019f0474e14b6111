//! `ledger-bridge check`: build and validate the daemon configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use bridge_core::Address;
use bridge_daemon::{
    config::DEFAULT_DB_FILE,
    reconcile::{DEFAULT_AUDIT_NAME, DEFAULT_CONFIRMATIONS, DEFAULT_START_BLOCK},
    schedule::{DEFAULT_INTERVAL, DEFAULT_OFFSET},
    BridgeConfig, Schedule,
};
use bridge_sync::facts::DEFAULT_SCHEMA_BASE_URL;

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[arg(long = "db", env = "LEDGER_BRIDGE_DB", default_value = DEFAULT_DB_FILE)]
    pub db_path: std::path::PathBuf,

    #[arg(long, env = "LEDGER_BRIDGE_SOURCE_URL", default_value = "")]
    pub source_url: String,

    #[arg(long, env = "LEDGER_BRIDGE_SOURCE_TOKEN", default_value = "", hide_env_values = true)]
    pub source_token: String,

    /// Passport holding user and mentor-list facts.
    #[arg(long, env = "LEDGER_BRIDGE_DID_ADDRESS", default_value = "")]
    pub did_address: String,

    #[arg(long, env = "LEDGER_BRIDGE_PASSPORT_FACTORY", default_value = "")]
    pub passport_factory: String,

    #[arg(long, env = "LEDGER_BRIDGE_SCHEMA_BASE_URL", default_value = DEFAULT_SCHEMA_BASE_URL)]
    pub schema_base_url: String,

    /// Block to start from when no cursor is stored.
    #[arg(long, env = "LEDGER_BRIDGE_START_BLOCK", default_value_t = DEFAULT_START_BLOCK)]
    pub start_block: u64,

    #[arg(long, env = "LEDGER_BRIDGE_CONFIRMATIONS", default_value_t = DEFAULT_CONFIRMATIONS)]
    pub confirmations: u64,

    #[arg(long, env = "LEDGER_BRIDGE_AUDIT_NAME", default_value = DEFAULT_AUDIT_NAME)]
    pub audit_name: String,

    /// Seconds between fact sync passes.
    #[arg(long, env = "LEDGER_BRIDGE_PROCESSING_INTERVAL", default_value_t = DEFAULT_INTERVAL.as_secs())]
    pub processing_interval: u64,

    /// Seconds past the minute of the first fact sync pass.
    #[arg(long, env = "LEDGER_BRIDGE_PROCESSING_OFFSET", default_value_t = DEFAULT_OFFSET.as_secs())]
    pub processing_offset: u64,

    /// Seconds between block reconcile runs.
    #[arg(long, env = "LEDGER_BRIDGE_VALIDATING_INTERVAL", default_value_t = DEFAULT_INTERVAL.as_secs())]
    pub validating_interval: u64,

    #[arg(long, env = "LEDGER_BRIDGE_VALIDATING_OFFSET", default_value_t = DEFAULT_OFFSET.as_secs())]
    pub validating_offset: u64,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl CheckArgs {
    pub fn to_config(&self) -> BridgeConfig {
        BridgeConfig {
            db_path: self.db_path.clone(),
            source_url: self.source_url.clone(),
            source_token: self.source_token.clone(),
            did_address: Address::new(&self.did_address),
            passport_factory: Address::new(&self.passport_factory),
            schema_base_url: self.schema_base_url.clone(),
            default_start_block: self.start_block,
            confirmations: self.confirmations,
            audit_name: self.audit_name.clone(),
            processing: Schedule::new(
                Duration::from_secs(self.processing_interval),
                Duration::from_secs(self.processing_offset),
            ),
            validating: Schedule::new(
                Duration::from_secs(self.validating_interval),
                Duration::from_secs(self.validating_offset),
            ),
        }
    }

    pub fn run(self) -> Result<()> {
        let config = self.to_config();
        config.validate().context("configuration check failed")?;

        if self.json {
            let payload = ConfigJson::from(&config);
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize config JSON")?
            );
            return Ok(());
        }

        println!("{} configuration is valid", "✓".green());
        println!("  database:          {}", config.db_path.display());
        println!("  update source:     {}", config.source_url);
        println!("  DID passport:      {}", config.did_address);
        println!("  passport factory:  {}", config.passport_factory);
        println!("  schemas:           {}", config.schema_base_url);
        println!(
            "  blocks:            start {} / {} confirmations",
            config.default_start_block, config.confirmations
        );
        println!(
            "  processing:        every {}s at +{}s",
            config.processing.interval.as_secs(),
            config.processing.offset.as_secs()
        );
        println!(
            "  validating:        every {}s at +{}s",
            config.validating.interval.as_secs(),
            config.validating.offset.as_secs()
        );
        Ok(())
    }
}

/// The effective configuration with the token redacted.
#[derive(Serialize)]
struct ConfigJson {
    db_path: String,
    source_url: String,
    source_token: &'static str,
    did_address: String,
    passport_factory: String,
    schema_base_url: String,
    default_start_block: u64,
    confirmations: u64,
    audit_name: String,
    processing_interval_secs: u64,
    processing_offset_secs: u64,
    validating_interval_secs: u64,
    validating_offset_secs: u64,
}

impl From<&BridgeConfig> for ConfigJson {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            db_path: config.db_path.display().to_string(),
            source_url: config.source_url.clone(),
            source_token: if config.source_token.is_empty() {
                ""
            } else {
                "<redacted>"
            },
            did_address: config.did_address.to_string(),
            passport_factory: config.passport_factory.to_string(),
            schema_base_url: config.schema_base_url.clone(),
            default_start_block: config.default_start_block,
            confirmations: config.confirmations,
            audit_name: config.audit_name.clone(),
            processing_interval_secs: config.processing.interval.as_secs(),
            processing_offset_secs: config.processing.offset.as_secs(),
            validating_interval_secs: config.validating.interval.as_secs(),
            validating_offset_secs: config.validating.offset.as_secs(),
        }
    }
}
