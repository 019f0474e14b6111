use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use bridge_core::Store;
use bridge_daemon::config::DEFAULT_DB_FILE;

pub mod check;
pub mod gc;
pub mod init;
pub mod pull;
pub mod status;

/// Database location shared by every command.
#[derive(Args, Debug, Clone)]
pub struct DbArgs {
    /// Path of the SQLite database file.
    #[arg(long = "db", env = "LEDGER_BRIDGE_DB", default_value = DEFAULT_DB_FILE)]
    pub path: PathBuf,
}

impl DbArgs {
    /// Open the database, creating it if missing.
    pub fn open(&self) -> Result<Store> {
        Store::open(&self.path)
            .with_context(|| format!("failed to open database at {}", self.path.display()))
    }

    /// Open an existing database; a missing file is an error.
    pub fn open_existing(&self) -> Result<Store> {
        if !self.path.exists() {
            anyhow::bail!(
                "database {} does not exist; run `ledger-bridge init` first",
                self.path.display()
            );
        }
        self.open()
    }
}
