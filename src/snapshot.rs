use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::artifacts;
use crate::quota::{EffectiveQuota, QuotaSource, QuotaWindow, parse_quota_line};
use crate::text;

static KEY_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9_]+)\s*=\s*(.*)$").expect("valid regex"));
static FIVE_HOUR_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)5\s*-?\s*hour|\b5h\b").expect("valid regex"));
static WEEKLY_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)weekly|\bweek\b|7\s*-?\s*day").expect("valid regex"));

const RECOGNIZED_KEYS: [&str; 9] = [
    "5h_remaining_percent",
    "5h_used_percent",
    "5h_resets_at",
    "weekly_remaining_percent",
    "weekly_used_percent",
    "weekly_resets_at",
    "5h_human",
    "weekly_human",
    "source",
];

/// A parsed user-pasted status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotQuota {
    pub five_hour: QuotaWindow,
    pub weekly: QuotaWindow,
    pub updated_at: DateTime<Utc>,
    pub source: Option<String>,
    pub raw: String,
}

impl SnapshotQuota {
    pub fn has_percent(&self) -> bool {
        self.five_hour.has_percent() || self.weekly.has_percent()
    }

    pub fn to_effective(&self, source: QuotaSource) -> EffectiveQuota {
        EffectiveQuota {
            five_hour: self.five_hour.clone(),
            weekly: self.weekly.clone(),
            updated_at: Some(self.updated_at),
            source,
        }
    }
}

/// A snapshot as read back from the project state dir, with the artifact's
/// modification-time staleness attached.
#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub quota: SnapshotQuota,
    pub captured_at: Option<DateTime<Utc>>,
    pub age_seconds: Option<i64>,
    pub is_stale: bool,
}

/// Parses a pasted status block. The structured `key=value` encoding wins
/// whenever any recognized key is present; otherwise free-text lines are
/// scanned per window. Empty input yields `None`.
pub fn parse_snapshot(raw: &str) -> Option<SnapshotQuota> {
    if raw.trim().is_empty() {
        return None;
    }

    let normalized_lines: Vec<String> = raw.lines().map(text::normalize).collect();
    let mut keys: BTreeMap<&str, String> = BTreeMap::new();
    for line in &normalized_lines {
        if let Some(caps) = KEY_VALUE_RE.captures(line) {
            let key = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            if let Some(recognized) = RECOGNIZED_KEYS.iter().find(|known| **known == key) {
                keys.insert(recognized, caps[2].trim().to_string());
            }
        }
    }

    let quota = if keys.is_empty() {
        from_free_text(&normalized_lines)
    } else {
        from_structured_keys(&keys)
    };

    Some(SnapshotQuota {
        raw: text::strip_ansi(raw),
        ..quota
    })
}

fn from_structured_keys(keys: &BTreeMap<&str, String>) -> SnapshotQuota {
    SnapshotQuota {
        five_hour: structured_window(
            keys.get("5h_remaining_percent"),
            keys.get("5h_used_percent"),
            keys.get("5h_resets_at"),
            keys.get("5h_human"),
        ),
        weekly: structured_window(
            keys.get("weekly_remaining_percent"),
            keys.get("weekly_used_percent"),
            keys.get("weekly_resets_at"),
            keys.get("weekly_human"),
        ),
        updated_at: Utc::now(),
        source: keys.get("source").cloned().filter(|s| !s.is_empty()),
        raw: String::new(),
    }
}

fn structured_window(
    remaining: Option<&String>,
    used: Option<&String>,
    resets_at: Option<&String>,
    human: Option<&String>,
) -> QuotaWindow {
    let remaining = remaining
        .and_then(|value| parse_number(value))
        .or_else(|| used.and_then(|value| parse_number(value)).map(|u| 100.0 - u));
    let reset_label = resets_at.and_then(|value| text::reset_label_from_text(value));
    QuotaWindow::from_remaining(
        remaining,
        false,
        reset_label,
        human.cloned().unwrap_or_default(),
    )
}

fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn from_free_text(lines: &[String]) -> SnapshotQuota {
    let five_hour = lines
        .iter()
        .find(|line| FIVE_HOUR_LINE_RE.is_match(line))
        .and_then(|line| parse_quota_line(line))
        .unwrap_or_else(QuotaWindow::unknown);
    let weekly = lines
        .iter()
        .find(|line| WEEKLY_LINE_RE.is_match(line))
        .and_then(|line| parse_quota_line(line))
        .unwrap_or_else(QuotaWindow::unknown);

    SnapshotQuota {
        five_hour,
        weekly,
        updated_at: Utc::now(),
        source: None,
        raw: String::new(),
    }
}

/// Renders the canonical newline-separated `key=value` form, the format the
/// snapshot artifact is persisted in.
pub fn render_snapshot(quota: &SnapshotQuota) -> String {
    let mut out = String::new();
    render_window(&mut out, "5h", &quota.five_hour);
    render_window(&mut out, "weekly", &quota.weekly);
    if let Some(source) = &quota.source {
        let _ = writeln!(out, "source={source}");
    }
    out
}

fn render_window(out: &mut String, prefix: &str, window: &QuotaWindow) {
    if let Some(remaining) = window.remaining_percent {
        let _ = writeln!(out, "{prefix}_remaining_percent={}", format_percent(remaining));
    }
    if let Some(used) = window.usage_percent {
        let _ = writeln!(out, "{prefix}_used_percent={}", format_percent(used));
    }
    if let Some(label) = &window.reset_label {
        let _ = writeln!(out, "{prefix}_resets_at={label}");
    }
    if !window.line.is_empty() {
        let _ = writeln!(out, "{prefix}_human={}", window.line);
    }
}

fn format_percent(value: f64) -> String {
    if (value - value.round()).abs() < f64::EPSILON {
        format!("{}", value.round() as i64)
    } else {
        format!("{value}")
    }
}

/// Loads the stored snapshot artifact and attaches mtime-based staleness.
pub fn load_snapshot(path: &Path, stale_after: Duration, now: DateTime<Utc>) -> Option<StoredSnapshot> {
    let raw = artifacts::read_text(path)?;
    let quota = parse_snapshot(&raw)?;

    let captured_at = artifacts::modified_at(path).map(DateTime::<Utc>::from);
    let age_seconds = captured_at.map(|ts| (now - ts).num_seconds().max(0));
    let is_stale = match age_seconds {
        Some(age) => age > stale_after.as_secs() as i64,
        None => true,
    };

    Some(StoredSnapshot {
        quota,
        captured_at,
        age_seconds,
        is_stale,
    })
}

/// Parses pasted text and persists its canonical form to the state dir.
pub fn import_snapshot(path: &Path, raw: &str) -> Result<Option<SnapshotQuota>> {
    let Some(quota) = parse_snapshot(raw) else {
        return Ok(None);
    };
    artifacts::write_text(path, &render_snapshot(&quota))?;
    Ok(Some(quota))
}
