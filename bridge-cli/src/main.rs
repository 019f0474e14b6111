//! ledger-bridge: operator CLI for the ledger bridge database.
//!
//! # Usage
//!
//! ```text
//! ledger-bridge init [--db <path>]
//! ledger-bridge pull [--db <path>] --source-url <url> --source-token <token>
//! ledger-bridge status [--db <path>] [--json]
//! ledger-bridge gc [--db <path>]
//! ledger-bridge check [--json] [daemon settings...]
//! ```
//!
//! Every flag can also be given through its `LEDGER_BRIDGE_*` environment
//! variable.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use bridge_daemon::LogFormat;
use commands::{
    check::CheckArgs, gc::GcArgs, init::InitArgs, pull::PullArgs, status::StatusArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "ledger-bridge",
    version,
    about = "Mirror record-store updates and track their ledger transactions",
    long_about = None,
)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "LEDGER_BRIDGE_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the bridge database and its schema.
    Init(InitArgs),

    /// Pull changed users and projects from the update source into the database.
    Pull(PullArgs),

    /// Show the block cursor and transaction counts by state.
    Status(StatusArgs),

    /// Delete successful transactions no record references any more.
    Gc(GcArgs),

    /// Validate daemon settings and print the effective configuration.
    Check(CheckArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    bridge_daemon::init_tracing(if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Text
    });
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Pull(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Gc(args) => args.run(),
        Commands::Check(args) => args.run(),
    }
}
