use std::fmt::Write as _;
use std::fs;
use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::cli::SnapshotCommands;
use crate::config::{self, DashConfig, Provider};
use crate::quota::QuotaWindow;
use crate::report::{self, SNAPSHOT_FILE, StatusReport};
use crate::sessions;
use crate::snapshot;
use crate::util;

pub fn print_status(
    cfg: &DashConfig,
    provider: Option<Provider>,
    project: &Path,
    json: bool,
) -> Result<()> {
    let provider = provider.unwrap_or(cfg.default_provider);
    let report = report::build_report(cfg, provider, project)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report));
    }
    Ok(())
}

pub fn watch(
    cfg: &DashConfig,
    provider: Option<Provider>,
    project: &Path,
    interval: Option<u64>,
) -> Result<()> {
    let provider = provider.unwrap_or(cfg.default_provider);
    let interval = interval
        .map(Duration::from_secs)
        .unwrap_or_else(|| cfg.poll_interval());
    let stop = install_stop_signal()?;

    println!("Watching {} (Ctrl+C to stop)", project.display());
    let mut last_rendered = String::new();
    while !stop.load(Ordering::Relaxed) {
        let rendered = render_report(&report::build_report(cfg, provider, project)?);
        if rendered != last_rendered {
            println!("--- {}", Utc::now().format("%H:%M:%S"));
            print!("{rendered}");
            last_rendered = rendered;
        }
        thread::sleep(interval);
    }
    Ok(())
}

pub fn snapshot_command(cfg: &DashConfig, command: SnapshotCommands) -> Result<()> {
    match command {
        SnapshotCommands::Import { project, file } => import_snapshot(cfg, &project, file),
        SnapshotCommands::Show { project } => show_snapshot(cfg, &project),
    }
}

fn import_snapshot(cfg: &DashConfig, project: &Path, file: Option<PathBuf>) -> Result<()> {
    let raw = match file {
        Some(path) => fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read snapshot from stdin")?;
            buffer
        }
    };

    let path = report::state_dir(cfg, project).join(SNAPSHOT_FILE);
    match snapshot::import_snapshot(&path, &raw)? {
        Some(quota) => {
            println!("Snapshot stored at {}", path.display());
            print!("{}", snapshot::render_snapshot(&quota));
        }
        None => println!("No quota information recognized in the input; nothing stored."),
    }
    Ok(())
}

fn show_snapshot(cfg: &DashConfig, project: &Path) -> Result<()> {
    let path = report::state_dir(cfg, project).join(SNAPSHOT_FILE);
    let Some(stored) = snapshot::load_snapshot(&path, cfg.snapshot_stale(), Utc::now()) else {
        println!("No snapshot stored at {}", path.display());
        return Ok(());
    };

    println!("snapshot: {}", path.display());
    match stored.age_seconds {
        Some(age) => println!(
            "captured: {} ago{}",
            util::human_duration(Duration::from_secs(age.max(0) as u64)),
            if stored.is_stale { " (stale)" } else { "" }
        ),
        None => println!("captured: unknown (treated as stale)"),
    }
    println!("5-hour: {}", render_window(&stored.quota.five_hour));
    println!("weekly: {}", render_window(&stored.quota.weekly));
    if let Some(source) = &stored.quota.source {
        println!("source: {source}");
    }
    Ok(())
}

pub fn doctor(cfg: &DashConfig, provider: Option<Provider>, project: &Path) -> Result<u8> {
    let provider = provider.unwrap_or(cfg.default_provider);
    let spec = provider.spec();
    let mut issues = 0u8;

    println!("ralph-dash doctor ({provider})");
    println!("config_path: {}", config::config_path().display());
    println!("project: {}", project.display());

    if project.is_dir() {
        println!("[OK] Project directory exists.");
    } else {
        issues += 1;
        println!("[WARN] Project directory does not exist.");
    }

    let state = report::state_dir(cfg, project);
    if state.is_dir() {
        println!("[OK] State directory present at {}.", state.display());
        if state.join(report::STATUS_FILE).is_file() {
            println!("[OK] Status file found.");
        } else {
            println!("[INFO] No status file yet; the loop has not reported.");
        }
    } else {
        issues += 1;
        println!(
            "[WARN] State directory {} not found; has the loop ever run here?",
            state.display()
        );
    }

    if spec.supports_session_journal {
        let roots = sessions::session_roots(&config::codex_home());
        let accessible = roots.iter().filter(|root| root.exists()).count();
        if accessible > 0 {
            println!("[OK] Discovered {accessible} accessible session root(s).");
        } else {
            issues += 1;
            println!("[WARN] No Codex session directory is currently accessible.");
        }
    } else {
        println!("[INFO] The {} CLI keeps no session journal to read.", spec.cli_name);
    }

    if ps_available() {
        println!("[OK] ps command available for process detection.");
    } else {
        issues += 1;
        println!("[WARN] ps command unavailable; orphan detection is degraded.");
    }

    if command_available(spec.cli_name) {
        println!("[OK] {} command available.", spec.cli_name);
    } else {
        println!(
            "[INFO] {} command not found in PATH (artifact monitoring still works).",
            spec.cli_name
        );
    }

    if !spec.supports_diagnostics_refresh {
        println!(
            "[INFO] The {} CLI cannot refresh quota diagnostics on demand; only log heuristics apply.",
            spec.cli_name
        );
    }

    if issues == 0 {
        println!("Doctor: healthy");
        Ok(0)
    } else {
        println!("Doctor: {issues} issue(s) found");
        Ok(1)
    }
}

fn render_report(report: &StatusReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "ralph-dash status ({})", report.provider);
    let _ = writeln!(out, "project: {}", report.project.display());

    let state = report
        .status
        .as_ref()
        .and_then(|status| status.status.as_deref())
        .unwrap_or("unknown");
    let derived = report
        .status
        .as_ref()
        .is_some_and(|status| status.derived);
    let age = match report.health.status_age_seconds {
        Some(age) => format!(
            "{} ago",
            util::human_duration(Duration::from_secs(age.max(0) as u64))
        ),
        None => "never".to_string(),
    };
    let _ = writeln!(
        out,
        "runtime: {state}{} ({}), {} process(es), reported {age}",
        if derived { " [inferred]" } else { "" },
        if report.health.runtime_healthy {
            "healthy"
        } else {
            "unhealthy"
        },
        report.health.processes_count,
    );
    if let Some(status) = &report.status
        && let (Some(loops), Some(calls)) = (status.loop_count, status.calls_count)
    {
        let _ = writeln!(out, "progress: loop {loops}, {calls} call(s)");
    }
    for process in &report.processes {
        let elapsed = process
            .elapsed_seconds
            .map(|secs| util::human_duration(Duration::from_secs(secs.max(0) as u64)))
            .unwrap_or_else(|| "?".to_string());
        let _ = writeln!(
            out,
            "  pid {} up {elapsed}: {}",
            process.pid,
            util::truncate(&process.command, 80)
        );
    }

    let _ = writeln!(out, "quota source: {}", report.quota.source.label());
    let _ = writeln!(out, "  5-hour: {}", render_window(&report.quota.five_hour));
    let _ = writeln!(out, "  weekly: {}", render_window(&report.quota.weekly));

    let _ = writeln!(
        out,
        "root cause: {}{}",
        report.diagnostics.root_cause,
        if report.diagnostics.is_stale {
            " (diagnosis based on stale data)"
        } else {
            ""
        }
    );
    let _ = writeln!(out, "recommendation: {}", report.diagnostics.recommendation);
    out
}

fn render_window(window: &QuotaWindow) -> String {
    let mut parts = Vec::new();
    if let Some(remaining) = window.remaining_percent {
        parts.push(format!("{remaining:.0}% left"));
    } else if let Some(used) = window.usage_percent {
        parts.push(format!("{used:.0}% used"));
    }
    if let Some(reset) = &window.reset_label {
        parts.push(format!("resets {reset}"));
    }
    if parts.is_empty() {
        window.status.label().to_string()
    } else {
        format!("{} [{}]", parts.join(", "), window.status.label())
    }
}

fn ps_available() -> bool {
    Command::new("ps")
        .args(["-axo", "pid="])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn command_available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn install_stop_signal() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    })
    .context("failed to install Ctrl+C handler")?;
    Ok(stop)
}
