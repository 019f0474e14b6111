//! `ledger-bridge gc`: drop finalized transactions nothing links to.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use super::DbArgs;

#[derive(Args, Debug)]
pub struct GcArgs {
    #[command(flatten)]
    pub db: DbArgs,
}

impl GcArgs {
    pub fn run(self) -> Result<()> {
        let store = self.db.open_existing()?;
        let deleted = store
            .delete_finalized_unreferenced_transactions()
            .context("garbage collection failed")?;
        println!(
            "{} removed {deleted} unreferenced successful transaction(s)",
            "✓".green()
        );
        Ok(())
    }
}
