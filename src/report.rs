use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::artifacts;
use crate::config::{self, DashConfig, Provider};
use crate::health::{self, DiagnosticsSummary, RuntimeHealth, RuntimeStatus};
use crate::logscan;
use crate::procs::{self, ProcessInfo};
use crate::quota::{self, EffectiveQuota, QuotaInputs, QuotaSource};
use crate::sessions;
use crate::snapshot;

pub const STATUS_FILE: &str = "status.json";
pub const SNAPSHOT_FILE: &str = "quota-snapshot.txt";

/// The one error class surfaced to the caller; every other failure
/// degrades to unknown/empty fields inside the report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("project directory does not exist: {0}")]
    InvalidProject(PathBuf),
}

/// One full merge of everything the dashboard knows about a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub provider: Provider,
    pub project: PathBuf,
    pub generated_at: DateTime<Utc>,
    pub status: Option<RuntimeStatus>,
    pub health: RuntimeHealth,
    pub processes: Vec<ProcessInfo>,
    pub quota: EffectiveQuota,
    pub diagnostics: DiagnosticsSummary,
}

pub fn state_dir(cfg: &DashConfig, project: &Path) -> PathBuf {
    project.join(&cfg.state_dir_name)
}

/// Re-reads every artifact and recomputes the full merge. Stateless apart
/// from the best-effort cache, which only backfills empty live fields and
/// is always refreshed afterwards. Backfill happens before health and
/// diagnostics run, so they always describe the status actually reported.
pub fn build_report(
    cfg: &DashConfig,
    provider: Provider,
    project: &Path,
) -> Result<StatusReport, ReportError> {
    if !project.is_dir() {
        return Err(ReportError::InvalidProject(project.to_path_buf()));
    }

    let now = Utc::now();
    let spec = provider.spec();
    let state = state_dir(cfg, project);

    let cache_file = cache_path(provider, project);
    let cached = artifacts::read_json::<StatusReport>(&cache_file);

    let mut status = artifacts::read_json::<RuntimeStatus>(&state.join(STATUS_FILE));
    if status.is_none()
        && let Some(cached) = cached.as_ref()
        && cached.status.is_some()
    {
        debug!("backfilling runtime status from cache");
        status = cached.status.clone();
    }
    let processes = procs::list_processes(spec.process_pattern);
    let (status, health) = health::assess(status.as_ref(), processes.len(), now);

    let stored_snapshot = if spec.supports_quota_snapshot {
        snapshot::load_snapshot(&state.join(SNAPSHOT_FILE), cfg.snapshot_stale(), now)
    } else {
        None
    };
    let session_limits = if spec.supports_session_journal {
        sessions::latest_rate_limits(&sessions::session_roots(&config::codex_home()))
    } else {
        None
    };
    let corpus = logscan::gather_corpus(&state, spec.log_file, spec.stderr_prefix);
    let log_quota = logscan::scan_quota(&corpus, spec.exposes_quota_in_logs, spec.cli_name);

    let canonical = status.as_ref().and_then(|status| status.effective_quota.clone());
    let inputs = QuotaInputs {
        canonical: canonical.as_ref(),
        snapshot: stored_snapshot.as_ref(),
        sessions: session_limits.as_ref(),
        logs: Some(&log_quota),
    };
    let mut effective = quota::build_effective_quota(&inputs, now);
    if effective.source == QuotaSource::None
        && let Some(cached) = cached.as_ref()
        && cached.quota.source != QuotaSource::None
    {
        debug!(source = cached.quota.source.label(), "backfilling quota from cache");
        effective = cached.quota.clone();
    }

    let diagnostics =
        health::derive_diagnostics(status.as_ref(), &health, Some(&effective.five_hour), now);

    let report = StatusReport {
        provider,
        project: project.to_path_buf(),
        generated_at: now,
        status,
        health,
        processes,
        quota: effective,
        diagnostics,
    };

    // Last-write-wins races on the cache file are acceptable: it is an
    // availability fallback, not a store of record.
    if let Err(err) = artifacts::write_json(&cache_file, &report) {
        debug!(error = %err, "failed to persist report cache");
    }
    Ok(report)
}

pub fn cache_path(provider: Provider, project: &Path) -> PathBuf {
    config::cache_dir().join(format!("{provider}-{}.json", project_key(project)))
}

fn project_key(project: &Path) -> String {
    let mut key = String::new();
    for ch in project.to_string_lossy().chars() {
        if ch.is_ascii_alphanumeric() {
            key.push(ch);
        } else {
            key.push('_');
        }
    }
    key.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::{Mutex, OnceLock};
    use tempfile::TempDir;

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    struct HomeGuard {
        _tmp: TempDir,
    }

    fn isolated_homes() -> HomeGuard {
        let tmp = TempDir::new().expect("temp dir");
        unsafe {
            std::env::set_var("RALPH_DASH_HOME", tmp.path().join("dash"));
            std::env::set_var("CODEX_HOME", tmp.path().join("codex"));
        }
        HomeGuard { _tmp: tmp }
    }

    #[test]
    fn invalid_project_is_the_only_surfaced_error() {
        let _mutex = env_lock().lock().expect("env lock");
        let _homes = isolated_homes();
        let cfg = DashConfig::default();

        let missing = PathBuf::from("/definitely/not/a/project");
        match build_report(&cfg, Provider::Codex, &missing) {
            Err(ReportError::InvalidProject(path)) => assert_eq!(path, missing),
            Ok(_) => panic!("expected invalid-project error"),
        }
    }

    #[test]
    fn empty_project_degrades_to_unknown() {
        let _mutex = env_lock().lock().expect("env lock");
        let _homes = isolated_homes();
        let cfg = DashConfig::default();
        let project = TempDir::new().expect("project dir");

        let report = build_report(&cfg, Provider::Gemini, project.path()).expect("report");
        assert!(report.status.is_none());
        assert!(!report.health.runtime_healthy);
        assert_eq!(report.quota.source, QuotaSource::None);
        assert!(report.diagnostics.is_stale);
    }

    #[test]
    fn snapshot_feeds_the_effective_quota() {
        let _mutex = env_lock().lock().expect("env lock");
        let _homes = isolated_homes();
        let cfg = DashConfig::default();
        let project = TempDir::new().expect("project dir");
        let state = state_dir(&cfg, project.path());
        fs::create_dir_all(&state).expect("state dir");
        fs::write(
            state.join(SNAPSHOT_FILE),
            "5h_remaining_percent=23\nweekly_remaining_percent=76\n",
        )
        .expect("write snapshot");

        let report = build_report(&cfg, Provider::Codex, project.path()).expect("report");
        assert_eq!(report.quota.source, QuotaSource::Snapshot);
        assert_eq!(report.quota.five_hour.remaining_percent, Some(23.0));
    }

    #[test]
    fn cache_backfills_empty_live_quota() {
        let _mutex = env_lock().lock().expect("env lock");
        let _homes = isolated_homes();
        let cfg = DashConfig::default();
        let project = TempDir::new().expect("project dir");
        let state = state_dir(&cfg, project.path());
        fs::create_dir_all(&state).expect("state dir");

        // First pass with a snapshot populates the cache.
        fs::write(state.join(SNAPSHOT_FILE), "5h_remaining_percent=42\n").expect("write");
        let first = build_report(&cfg, Provider::Codex, project.path()).expect("report");
        assert_eq!(first.quota.five_hour.remaining_percent, Some(42.0));

        // Second pass with the artifact gone is served from the cache.
        fs::remove_file(state.join(SNAPSHOT_FILE)).expect("remove");
        let second = build_report(&cfg, Provider::Codex, project.path()).expect("report");
        assert_eq!(second.quota.five_hour.remaining_percent, Some(42.0));
        assert_ne!(second.quota.source, QuotaSource::None);
    }

    #[test]
    fn cached_status_backfills_before_diagnostics() {
        let _mutex = env_lock().lock().expect("env lock");
        let _homes = isolated_homes();
        let cfg = DashConfig::default();
        let project = TempDir::new().expect("project dir");
        let state = state_dir(&cfg, project.path());
        fs::create_dir_all(&state).expect("state dir");

        let timestamp = Utc::now().to_rfc3339();
        fs::write(
            state.join(STATUS_FILE),
            format!(r#"{{"status":"running","timestamp":"{timestamp}"}}"#),
        )
        .expect("write status");
        build_report(&cfg, Provider::Codex, project.path()).expect("report");

        // With the live file gone the cached status must flow into health
        // and diagnostics, not just the response record.
        fs::remove_file(state.join(STATUS_FILE)).expect("remove");
        let report = build_report(&cfg, Provider::Codex, project.path()).expect("report");
        assert!(report.status.is_some());
        assert_eq!(report.diagnostics.source, "runtime_status");
        assert!(!report.diagnostics.root_cause.contains("No status file"));
    }

    #[test]
    fn project_key_is_filesystem_safe() {
        assert_eq!(project_key(Path::new("/tmp/my repo")), "tmp_my_repo");
        assert!(!project_key(Path::new("/a/b")).contains('/'));
    }
}
