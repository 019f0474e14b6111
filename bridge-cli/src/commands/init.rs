//! `ledger-bridge init`: create the database.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::DbArgs;

#[derive(Args, Debug)]
pub struct InitArgs {
    #[command(flatten)]
    pub db: DbArgs,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let existed = self.db.path.exists();
        let store = self.db.open()?;
        let cursor = store.latest_processed_block()?;

        let verb = if existed { "verified" } else { "created" };
        println!(
            "{} {verb} database at {}",
            "✓".green(),
            self.db.path.display()
        );
        match cursor {
            Some(block) => println!("  last processed block: {block}"),
            None => println!("  no blocks processed yet"),
        }
        Ok(())
    }
}
