use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::logscan::LogQuota;
use crate::sessions::SessionRateLimits;
use crate::snapshot::StoredSnapshot;
use crate::text;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    Ok,
    Warning,
    Limited,
    #[default]
    Unknown,
}

impl WindowStatus {
    /// The one classification rule applied everywhere a window is read:
    /// no percentage -> unknown, exhausted or phrase-matched -> limited,
    /// single digits remaining -> warning.
    pub fn classify(remaining_percent: Option<f64>, limited_hint: bool) -> Self {
        if limited_hint {
            return Self::Limited;
        }
        match remaining_percent {
            None => Self::Unknown,
            Some(value) if value <= 0.0 => Self::Limited,
            Some(value) if value <= 10.0 => Self::Warning,
            Some(_) => Self::Ok,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Limited => "limited",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct QuotaWindow {
    pub status: WindowStatus,
    pub remaining_percent: Option<f64>,
    pub usage_percent: Option<f64>,
    pub reset_label: Option<String>,
    #[serde(default)]
    pub line: String,
}

impl QuotaWindow {
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Builds a window from a remaining percentage, deriving usage as the
    /// complement and classifying with the canonical rule.
    pub fn from_remaining(
        remaining_percent: Option<f64>,
        limited_hint: bool,
        reset_label: Option<String>,
        line: String,
    ) -> Self {
        let remaining_percent = remaining_percent.map(clamp_percent);
        let usage_percent = remaining_percent.map(|value| 100.0 - value);
        Self {
            status: WindowStatus::classify(remaining_percent, limited_hint),
            remaining_percent,
            usage_percent,
            reset_label,
            line,
        }
    }

    pub fn has_percent(&self) -> bool {
        self.remaining_percent.is_some() || self.usage_percent.is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuotaSource {
    StatusJson,
    Snapshot,
    CodexSessions,
    SnapshotStale,
    HeuristicsLogs,
    #[default]
    None,
}

impl QuotaSource {
    pub fn label(self) -> &'static str {
        match self {
            Self::StatusJson => "status_json",
            Self::Snapshot => "snapshot",
            Self::CodexSessions => "codex_sessions",
            Self::SnapshotStale => "snapshot_stale",
            Self::HeuristicsLogs => "heuristics_logs",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EffectiveQuota {
    pub five_hour: QuotaWindow,
    pub weekly: QuotaWindow,
    pub updated_at: Option<DateTime<Utc>>,
    pub source: QuotaSource,
}

impl EffectiveQuota {
    pub fn unknown(now: DateTime<Utc>) -> Self {
        Self {
            five_hour: QuotaWindow::unknown(),
            weekly: QuotaWindow::unknown(),
            updated_at: Some(now),
            source: QuotaSource::None,
        }
    }

    pub fn has_percent(&self) -> bool {
        self.five_hour.has_percent() || self.weekly.has_percent()
    }
}

pub fn clamp_percent(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

static PERCENT_LEFT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*%\s*left").expect("valid regex"));
static PERCENT_USED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*%\s*used").expect("valid regex"));
static PERCENT_ANY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").expect("valid regex"));
static RESET_PAREN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\(\s*resets?\s+([^)]+)\)").expect("valid regex"));
static QUALIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(left|used)\b").expect("valid regex"));
static LIMITED_PHRASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)rate limit reached|limit reached|exceeded|blocked|\bno\b.*\bleft\b|\b0\s*%\s*left")
        .expect("valid regex")
});

/// Extracts quota state from one free-text line. Returns `None` when the
/// normalized line is empty; otherwise always returns a window, possibly
/// with null percentages.
pub fn parse_quota_line(raw: &str) -> Option<QuotaWindow> {
    let line = text::normalize(raw);
    if line.is_empty() {
        return None;
    }

    // "N% left" beats "N% used" beats a bare "N%", which the status popup
    // reports as remaining.
    let remaining = if let Some(caps) = PERCENT_LEFT_RE.captures(&line) {
        parse_percent(&caps[1])
    } else if let Some(caps) = PERCENT_USED_RE.captures(&line) {
        parse_percent(&caps[1]).map(|used| 100.0 - used)
    } else if let Some(caps) = PERCENT_ANY_RE.captures(&line) {
        parse_percent(&caps[1])
    } else {
        None
    };

    let reset_label = extract_reset_label(&line);
    let limited_hint = LIMITED_PHRASE_RE.is_match(&line);
    Some(QuotaWindow::from_remaining(
        remaining,
        limited_hint,
        reset_label,
        line,
    ))
}

fn parse_percent(digits: &str) -> Option<f64> {
    digits.parse::<f64>().ok().map(clamp_percent)
}

fn extract_reset_label(line: &str) -> Option<String> {
    if let Some(caps) = RESET_PAREN_RE.captures(line) {
        return text::reset_label_from_text(&caps[1]);
    }

    let last_percent_end = PERCENT_ANY_RE.find_iter(line).last()?.end();
    let trailing = line[last_percent_end..].trim();
    if trailing.is_empty() || QUALIFIER_RE.is_match(trailing) {
        return None;
    }
    text::reset_label_from_text(trailing)
}

/// All possible inputs to one effective-quota resolution.
#[derive(Debug, Default)]
pub struct QuotaInputs<'a> {
    pub canonical: Option<&'a EffectiveQuota>,
    pub snapshot: Option<&'a StoredSnapshot>,
    pub sessions: Option<&'a SessionRateLimits>,
    pub logs: Option<&'a LogQuota>,
}

/// Merges the quota sources by fixed precedence. Exactly one branch wins;
/// sources are never blended.
pub fn build_effective_quota(inputs: &QuotaInputs<'_>, now: DateTime<Utc>) -> EffectiveQuota {
    if let Some(canonical) = inputs.canonical
        && canonical.has_percent()
    {
        return normalize_canonical(canonical, now);
    }

    if let Some(stored) = inputs.snapshot
        && stored.quota.has_percent()
        && !stored.is_stale
    {
        return stored.quota.to_effective(QuotaSource::Snapshot);
    }

    if let Some(limits) = inputs.sessions
        && limits.has_any_window()
    {
        return EffectiveQuota {
            five_hour: limits.five_hour_window(),
            weekly: limits.weekly_window(),
            updated_at: Some(limits.observed_at.unwrap_or(now)),
            source: QuotaSource::CodexSessions,
        };
    }

    if let Some(stored) = inputs.snapshot
        && stored.quota.has_percent()
    {
        return stored.quota.to_effective(QuotaSource::SnapshotStale);
    }

    if let Some(logs) = inputs.logs
        && logs.has_signal()
    {
        return EffectiveQuota {
            five_hour: logs.five_hour.to_window(),
            weekly: logs.weekly.to_window(),
            updated_at: Some(now),
            source: QuotaSource::HeuristicsLogs,
        };
    }

    EffectiveQuota::unknown(now)
}

fn normalize_canonical(canonical: &EffectiveQuota, now: DateTime<Utc>) -> EffectiveQuota {
    let source = if canonical.source == QuotaSource::None {
        QuotaSource::StatusJson
    } else {
        canonical.source
    };
    EffectiveQuota {
        five_hour: normalize_window(&canonical.five_hour),
        weekly: normalize_window(&canonical.weekly),
        updated_at: canonical.updated_at.or(Some(now)),
        source,
    }
}

fn normalize_window(window: &QuotaWindow) -> QuotaWindow {
    let remaining = window
        .remaining_percent
        .or_else(|| window.usage_percent.map(|used| 100.0 - used));
    let limited_hint = window.status == WindowStatus::Limited;
    QuotaWindow::from_remaining(
        remaining,
        limited_hint,
        window.reset_label.clone(),
        window.line.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logscan::LogWindow;
    use crate::sessions::SessionWindow;
    use crate::snapshot;

    #[test]
    fn percent_left_sets_remaining_and_complement() {
        for n in [0u32, 1, 10, 37, 100] {
            let window = parse_quota_line(&format!("{n}% left")).expect("window");
            assert_eq!(window.remaining_percent, Some(f64::from(n)));
            assert_eq!(window.usage_percent, Some(100.0 - f64::from(n)));
            assert_eq!(window.status == WindowStatus::Limited, n == 0);
        }
    }

    #[test]
    fn percent_used_sets_usage_and_complement() {
        let window = parse_quota_line("5-hour window: 82% used").expect("window");
        assert_eq!(window.usage_percent, Some(82.0));
        assert_eq!(window.remaining_percent, Some(18.0));
        assert_eq!(window.status, WindowStatus::Ok);
    }

    #[test]
    fn bare_percent_is_treated_as_remaining() {
        let window = parse_quota_line("weekly 7%").expect("window");
        assert_eq!(window.remaining_percent, Some(7.0));
        assert_eq!(window.status, WindowStatus::Warning);
    }

    #[test]
    fn empty_line_yields_none() {
        assert_eq!(parse_quota_line(""), None);
        assert_eq!(parse_quota_line("  \u{1b}[0m  "), None);
    }

    #[test]
    fn limit_phrases_force_limited() {
        let window = parse_quota_line("usage limit reached, 40% left").expect("window");
        assert_eq!(window.status, WindowStatus::Limited);
        let window = parse_quota_line("request blocked by provider").expect("window");
        assert_eq!(window.status, WindowStatus::Limited);
        assert_eq!(window.remaining_percent, None);
    }

    #[test]
    fn reset_label_prefers_parenthetical() {
        let window = parse_quota_line("37% left (resets 10:00 PM)").expect("window");
        assert_eq!(window.reset_label.as_deref(), Some("10:00 PM"));
    }

    #[test]
    fn reset_label_from_trailing_text_skips_qualifiers() {
        let window = parse_quota_line("5h limit: 37% remaining until Friday").expect("window");
        assert_eq!(window.reset_label.as_deref(), Some("remaining until Friday"));

        let window = parse_quota_line("5h limit: 37% left").expect("window");
        assert_eq!(window.reset_label, None);
    }

    #[test]
    fn reset_label_converts_epoch_parenthetical() {
        let window = parse_quota_line("12% left (resets 1770671532)").expect("window");
        let label = window.reset_label.expect("label");
        assert!(!label.chars().all(|ch| ch.is_ascii_digit()));
    }

    #[test]
    fn out_of_range_percent_is_clamped() {
        let window = parse_quota_line("250% left").expect("window");
        assert_eq!(window.remaining_percent, Some(100.0));
        assert_eq!(window.usage_percent, Some(0.0));
    }

    fn canonical_quota() -> EffectiveQuota {
        EffectiveQuota {
            five_hour: QuotaWindow::from_remaining(Some(55.0), false, None, String::new()),
            weekly: QuotaWindow::from_remaining(Some(70.0), false, None, String::new()),
            updated_at: Some(Utc::now()),
            source: QuotaSource::StatusJson,
        }
    }

    fn stored_snapshot(stale: bool) -> StoredSnapshot {
        let quota =
            snapshot::parse_snapshot("5h_remaining_percent=23\nweekly_remaining_percent=76\n")
                .expect("snapshot");
        StoredSnapshot {
            quota,
            captured_at: Some(Utc::now()),
            age_seconds: Some(if stale { 1000 } else { 10 }),
            is_stale: stale,
        }
    }

    fn session_limits() -> SessionRateLimits {
        SessionRateLimits {
            five_hour: Some(SessionWindow {
                remaining_percent: 60.0,
                reset_label: None,
            }),
            weekly: Some(SessionWindow {
                remaining_percent: 8.0,
                reset_label: None,
            }),
            observed_at: Some(Utc::now()),
            source_file: std::path::PathBuf::from("rollout-test.jsonl"),
        }
    }

    fn log_quota() -> LogQuota {
        LogQuota {
            five_hour: LogWindow {
                status: WindowStatus::Limited,
                line: Some("usage limit reached".to_string()),
                explanation: None,
            },
            weekly: LogWindow {
                status: WindowStatus::Unknown,
                line: None,
                explanation: Some("no weekly quota signal found in recent logs".to_string()),
            },
        }
    }

    #[test]
    fn canonical_payload_wins_over_everything() {
        let canonical = canonical_quota();
        let snapshot = stored_snapshot(false);
        let sessions = session_limits();
        let logs = log_quota();
        let inputs = QuotaInputs {
            canonical: Some(&canonical),
            snapshot: Some(&snapshot),
            sessions: Some(&sessions),
            logs: Some(&logs),
        };

        let resolved = build_effective_quota(&inputs, Utc::now());
        assert_eq!(resolved.source, QuotaSource::StatusJson);
        assert_eq!(resolved.five_hour.remaining_percent, Some(55.0));
        assert_eq!(resolved.weekly.remaining_percent, Some(70.0));
    }

    #[test]
    fn fresh_snapshot_beats_sessions() {
        let snapshot = stored_snapshot(false);
        let sessions = session_limits();
        let inputs = QuotaInputs {
            snapshot: Some(&snapshot),
            sessions: Some(&sessions),
            ..QuotaInputs::default()
        };

        let resolved = build_effective_quota(&inputs, Utc::now());
        assert_eq!(resolved.source, QuotaSource::Snapshot);
        assert_eq!(resolved.five_hour.remaining_percent, Some(23.0));
    }

    #[test]
    fn stale_snapshot_loses_to_sessions_but_beats_logs() {
        let snapshot = stored_snapshot(true);
        let sessions = session_limits();
        let logs = log_quota();

        let inputs = QuotaInputs {
            snapshot: Some(&snapshot),
            sessions: Some(&sessions),
            logs: Some(&logs),
            ..QuotaInputs::default()
        };
        let resolved = build_effective_quota(&inputs, Utc::now());
        assert_eq!(resolved.source, QuotaSource::CodexSessions);
        assert_eq!(resolved.five_hour.remaining_percent, Some(60.0));
        assert_eq!(resolved.weekly.status, WindowStatus::Warning);

        let inputs = QuotaInputs {
            snapshot: Some(&snapshot),
            logs: Some(&logs),
            ..QuotaInputs::default()
        };
        let resolved = build_effective_quota(&inputs, Utc::now());
        assert_eq!(resolved.source, QuotaSource::SnapshotStale);
    }

    #[test]
    fn logs_are_the_last_resort_before_none() {
        let logs = log_quota();
        let inputs = QuotaInputs {
            logs: Some(&logs),
            ..QuotaInputs::default()
        };
        let resolved = build_effective_quota(&inputs, Utc::now());
        assert_eq!(resolved.source, QuotaSource::HeuristicsLogs);
        assert_eq!(resolved.five_hour.status, WindowStatus::Limited);
        assert_eq!(resolved.five_hour.remaining_percent, None);

        let resolved = build_effective_quota(&QuotaInputs::default(), Utc::now());
        assert_eq!(resolved.source, QuotaSource::None);
        assert_eq!(resolved.five_hour.status, WindowStatus::Unknown);
    }

    #[test]
    fn canonical_usage_only_window_is_completed() {
        let canonical = EffectiveQuota {
            five_hour: QuotaWindow {
                status: WindowStatus::Unknown,
                remaining_percent: None,
                usage_percent: Some(77.0),
                reset_label: None,
                line: String::new(),
            },
            weekly: QuotaWindow::unknown(),
            updated_at: None,
            source: QuotaSource::None,
        };
        let inputs = QuotaInputs {
            canonical: Some(&canonical),
            ..QuotaInputs::default()
        };

        let resolved = build_effective_quota(&inputs, Utc::now());
        assert_eq!(resolved.source, QuotaSource::StatusJson);
        assert_eq!(resolved.five_hour.remaining_percent, Some(23.0));
        assert_eq!(resolved.five_hour.status, WindowStatus::Ok);
        assert!(resolved.updated_at.is_some());
    }
}
