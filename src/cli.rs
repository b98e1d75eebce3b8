use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Provider;

#[derive(Parser, Debug)]
#[command(
    name = "ralph-dash",
    version,
    about = "Local status and quota dashboard for Ralph automation loops"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print a one-shot status report for a project.
    Status {
        #[arg(long, default_value = ".", value_name = "DIR")]
        project: PathBuf,
        #[arg(long, value_enum)]
        provider: Option<Provider>,
        /// Emit the full report as JSON instead of the text summary.
        #[arg(long)]
        json: bool,
    },
    /// Re-render the status report whenever something changes.
    Watch {
        #[arg(long, default_value = ".", value_name = "DIR")]
        project: PathBuf,
        #[arg(long, value_enum)]
        provider: Option<Provider>,
        /// Poll interval in seconds (overrides the configured value).
        #[arg(long, value_name = "SECONDS")]
        interval: Option<u64>,
    },
    /// Manage the quota snapshot artifact.
    #[command(subcommand)]
    Snapshot(SnapshotCommands),
    /// Run health diagnostics for setup and runtime requirements.
    Doctor {
        #[arg(long, default_value = ".", value_name = "DIR")]
        project: PathBuf,
        #[arg(long, value_enum)]
        provider: Option<Provider>,
    },
}

#[derive(Subcommand, Debug)]
pub enum SnapshotCommands {
    /// Parse raw `/status` output (stdin or a file) and store it canonically.
    Import {
        #[arg(long, default_value = ".", value_name = "DIR")]
        project: PathBuf,
        /// Read from this file instead of stdin.
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },
    /// Show the stored snapshot and its freshness.
    Show {
        #[arg(long, default_value = ".", value_name = "DIR")]
        project: PathBuf,
    },
}
