use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;
use walkdir::WalkDir;

use crate::quota::{QuotaWindow, clamp_percent};
use crate::text;

const MAX_CANDIDATE_FILES: usize = 30;
const TAIL_LINES: usize = 600;
const MAX_WALK_DEPTH: usize = 6;

/// One rate-limit window as reported by the agent CLI's own journal.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionWindow {
    pub remaining_percent: f64,
    pub reset_label: Option<String>,
}

/// The newest rate-limit telemetry found across the session journals.
#[derive(Debug, Clone)]
pub struct SessionRateLimits {
    pub five_hour: Option<SessionWindow>,
    pub weekly: Option<SessionWindow>,
    pub observed_at: Option<DateTime<Utc>>,
    pub source_file: PathBuf,
}

impl SessionRateLimits {
    pub fn has_any_window(&self) -> bool {
        self.five_hour.is_some() || self.weekly.is_some()
    }

    pub fn five_hour_window(&self) -> QuotaWindow {
        Self::to_window(self.five_hour.as_ref())
    }

    pub fn weekly_window(&self) -> QuotaWindow {
        Self::to_window(self.weekly.as_ref())
    }

    fn to_window(window: Option<&SessionWindow>) -> QuotaWindow {
        match window {
            Some(window) => QuotaWindow::from_remaining(
                Some(window.remaining_percent),
                false,
                window.reset_label.clone(),
                String::new(),
            ),
            None => QuotaWindow::unknown(),
        }
    }
}

/// The per-user journal roots, including the archived subtree.
pub fn session_roots(codex_home: &Path) -> Vec<PathBuf> {
    vec![
        codex_home.join("sessions"),
        codex_home.join("archived_sessions"),
    ]
}

/// Scans journal files newest-first for the most recent token-count event
/// carrying a `rate_limits` payload. Unreadable files and malformed lines
/// are skipped; returns `None` when no usable event exists.
pub fn latest_rate_limits(roots: &[PathBuf]) -> Option<SessionRateLimits> {
    let mut candidates: Vec<(PathBuf, SystemTime)> = Vec::new();
    for root in roots {
        if !root.exists() {
            continue;
        }
        for entry in WalkDir::new(root)
            .max_depth(MAX_WALK_DEPTH)
            .into_iter()
            .filter_map(std::result::Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if !is_journal_file(entry.path()) {
                continue;
            }
            let Some(modified) = entry.metadata().ok().and_then(|meta| meta.modified().ok())
            else {
                continue;
            };
            candidates.push((entry.into_path(), modified));
        }
    }

    candidates.sort_by_key(|(_, modified)| Reverse(*modified));
    candidates.truncate(MAX_CANDIDATE_FILES);

    for (path, _) in candidates {
        if let Some(limits) = scan_journal_tail(&path) {
            return Some(limits);
        }
    }
    None
}

fn is_journal_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("rollout-") && name.ends_with(".jsonl"))
}

fn scan_journal_tail(path: &Path) -> Option<SessionRateLimits> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "skipping unreadable journal");
            return None;
        }
    };

    // Most recent event first.
    for line in content.lines().rev().take(TAIL_LINES) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(parsed) = serde_json::from_str::<Value>(trimmed) else {
            continue;
        };
        if let Some(limits) = rate_limits_from_event(&parsed, path) {
            return Some(limits);
        }
    }
    None
}

fn rate_limits_from_event(event: &Value, path: &Path) -> Option<SessionRateLimits> {
    if event.get("type").and_then(Value::as_str) != Some("event_msg") {
        return None;
    }
    let payload = event.get("payload")?;
    if payload.get("type").and_then(Value::as_str) != Some("token_count") {
        return None;
    }
    let rate_limits = payload.get("rate_limits")?;

    let five_hour = parse_session_window(rate_limits.get("primary"));
    let weekly = parse_session_window(rate_limits.get("secondary"));
    if five_hour.is_none() && weekly.is_none() {
        return None;
    }

    let observed_at = event
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
        .map(|ts| ts.with_timezone(&Utc));

    Some(SessionRateLimits {
        five_hour,
        weekly,
        observed_at,
        source_file: path.to_path_buf(),
    })
}

fn parse_session_window(value: Option<&Value>) -> Option<SessionWindow> {
    let value = value?;
    let used = value
        .get("used_percent")
        .and_then(Value::as_f64)
        .map(clamp_percent)?;
    let remaining = clamp_percent(100.0 - used).round();
    let reset_label = value
        .get("resets_at")
        .and_then(Value::as_i64)
        .and_then(text::format_epoch_label);

    Some(SessionWindow {
        remaining_percent: remaining,
        reset_label,
    })
}
