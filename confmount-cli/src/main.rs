//! confmount — project a ConfigMap or Secret into a directory and keep it in
//! sync.
//!
//! # Usage
//!
//! ```text
//! confmount run   (-c <name[.ns]> | -s <name[.ns]>) -m <dir> --store-dir <dir>
//!                 [-b <cmd>] [--resync-interval <secs>] [--workers <n>] [--file-mode <octal>]
//! confmount check (-c <name[.ns]> | -s <name[.ns]>) -m <dir> --store-dir <dir>
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{check::CheckArgs, run::RunArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "confmount",
    version,
    about = "Mount a ConfigMap or Secret into a directory and keep it up to date",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Publish the resource, then watch it and republish on every change.
    Run(RunArgs),

    /// Publish the resource once and print a JSON report.
    Check(CheckArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => args.run(),
        Commands::Check(args) => args.run(),
    }
}
