//! `ledger-bridge pull`: one local store synchronization.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use bridge_sync::{sync_local_store, HttpUpdateSource};

use super::DbArgs;

#[derive(Args, Debug)]
pub struct PullArgs {
    #[command(flatten)]
    pub db: DbArgs,

    /// Base URL of the record store API.
    #[arg(long, env = "LEDGER_BRIDGE_SOURCE_URL")]
    pub source_url: String,

    /// Bearer token for the record store API.
    #[arg(long, env = "LEDGER_BRIDGE_SOURCE_TOKEN", hide_env_values = true)]
    pub source_token: String,
}

impl PullArgs {
    pub fn run(self) -> Result<()> {
        let store = self.db.open()?;
        let source = HttpUpdateSource::new(&self.source_url, &self.source_token);
        let batch = sync_local_store(&store, &source)
            .with_context(|| format!("pull from {} failed", self.source_url))?;

        if batch.is_empty() {
            println!("{} nothing changed since the last pull", "✓".green());
            return Ok(());
        }
        println!(
            "{} pulled {} user(s) and {} project(s)",
            "✓".green(),
            batch.users.len(),
            batch.projects.len()
        );
        for project in batch.projects.iter().filter(|p| p.passport_address.is_empty()) {
            println!(
                "  {} project {} ({}) has no passport yet",
                "•".yellow(),
                project.id,
                project.name
            );
        }
        Ok(())
    }
}
