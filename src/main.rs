use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use ralph_dash::app;
use ralph_dash::cli::{Cli, Commands};
use ralph_dash::config::DashConfig;
use ralph_dash::util::setup_tracing;

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("ralph-dash error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<u8> {
    setup_tracing();
    let cli = Cli::parse();
    let config = DashConfig::load_or_init()?;

    match cli.command {
        Some(Commands::Status {
            project,
            provider,
            json,
        }) => {
            app::print_status(&config, provider, &project, json)?;
            Ok(0)
        }
        Some(Commands::Watch {
            project,
            provider,
            interval,
        }) => {
            app::watch(&config, provider, &project, interval)?;
            Ok(0)
        }
        Some(Commands::Snapshot(command)) => {
            app::snapshot_command(&config, command)?;
            Ok(0)
        }
        Some(Commands::Doctor { project, provider }) => {
            app::doctor(&config, provider, &project)
        }
        None => {
            app::print_status(&config, None, &std::path::PathBuf::from("."), false)?;
            Ok(0)
        }
    }
}
