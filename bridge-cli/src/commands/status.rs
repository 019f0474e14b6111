//! `ledger-bridge status`: cursor, transaction state counts and queued facts.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use bridge_core::{TransactionCounts, TxState};

use super::DbArgs;

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub db: DbArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let store = self.db.open_existing()?;
        let report = StatusReport {
            latest_processed_block: store
                .latest_processed_block()
                .context("failed to read block cursor")?,
            transactions: store
                .transaction_counts()
                .context("failed to count transactions")?,
            queued_facts: store
                .fact_backlog()
                .context("failed to read fact backlog")?
                .len(),
        };

        if self.json {
            print_json(&report)?;
        } else {
            print_table(&report);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct StatusReport {
    latest_processed_block: Option<u64>,
    transactions: TransactionCounts,
    queued_facts: usize,
}

#[derive(Serialize)]
struct StatusReportJson {
    latest_processed_block: Option<u64>,
    transactions: TransactionCountsJson,
    queued_facts: usize,
}

#[derive(Serialize)]
struct TransactionCountsJson {
    in_progress: u64,
    successful: u64,
    failed: u64,
    total: u64,
}

#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "transactions")]
    count: u64,
}

fn print_json(report: &StatusReport) -> Result<()> {
    let counts = &report.transactions;
    let payload = StatusReportJson {
        latest_processed_block: report.latest_processed_block,
        transactions: TransactionCountsJson {
            in_progress: counts.in_progress,
            successful: counts.successful,
            failed: counts.failed,
            total: counts.total(),
        },
        queued_facts: report.queued_facts,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(report: &StatusReport) {
    let cursor = match report.latest_processed_block {
        Some(block) => block.to_string(),
        None => "none".to_string(),
    };
    println!(
        "ledger-bridge v{} | last processed block: {} | {} transactions",
        env!("CARGO_PKG_VERSION"),
        cursor.bold(),
        report.transactions.total(),
    );

    let rows: Vec<StateRow> = TxState::ALL
        .iter()
        .map(|state| StateRow {
            state: state_label(*state),
            count: count_for(&report.transactions, *state),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if report.transactions.in_progress > 0 {
        println!(
            "{} transaction(s) awaiting confirmation.",
            report.transactions.in_progress
        );
    }
    if report.queued_facts > 0 {
        println!("{} fact(s) queued for the next pass.", report.queued_facts);
    }
}

fn count_for(counts: &TransactionCounts, state: TxState) -> u64 {
    match state {
        TxState::InProgress => counts.in_progress,
        TxState::Successful => counts.successful,
        TxState::Failed => counts.failed,
    }
}

fn state_label(state: TxState) -> String {
    match state {
        TxState::InProgress => state.to_string().yellow().to_string(),
        TxState::Successful => state.to_string().green().to_string(),
        TxState::Failed => state.to_string().red().to_string(),
    }
}
