use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::quota::{EffectiveQuota, WindowStatus};

pub const FRESH_THRESHOLD_SECS: i64 = 30;
pub const ORPHAN_THRESHOLD_SECS: i64 = 45;
pub const DIAGNOSTICS_STALE_SECS: i64 = 900;

const ACTIVE_STATES: [&str; 4] = ["running", "paused", "retrying", "executing"];
const TERMINAL_STATES: [&str; 6] = [
    "error",
    "failed",
    "halted",
    "stopped",
    "completed",
    "stopped_unexpected",
];

/// The loop's self-reported status file. Written externally; read-only here
/// apart from the synthetic orphan overlay, which never persists back.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuntimeStatus {
    pub status: Option<String>,
    pub loop_count: Option<u64>,
    pub calls_count: Option<u64>,
    #[serde(deserialize_with = "de_flexible_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    pub last_action: Option<String>,
    pub exit_reason: Option<String>,
    pub derived: bool,
    pub effective_quota: Option<EffectiveQuota>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RuntimeStatus {
    pub fn is_active(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|status| ACTIVE_STATES.contains(&status))
    }

    pub fn is_terminal(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|status| TERMINAL_STATES.contains(&status))
    }
}

// The shell loop writes timestamps as RFC 3339 or epoch seconds depending
// on its version; accept both.
fn de_flexible_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(parse_flexible_timestamp))
}

fn parse_flexible_timestamp(value: Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(&text)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
            .or_else(|| {
                text.trim()
                    .parse::<i64>()
                    .ok()
                    .and_then(|epoch| Utc.timestamp_opt(epoch, 0).single())
            }),
        Value::Number(number) => number
            .as_i64()
            .and_then(|epoch| Utc.timestamp_opt(epoch, 0).single()),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeHealth {
    pub processes_count: usize,
    pub status_age_seconds: Option<i64>,
    pub status_fresh: bool,
    pub runtime_healthy: bool,
}

/// Cross-references the self-reported status with the live process count.
/// Returns the possibly-overlaid status copy and the derived health flags.
pub fn assess(
    status: Option<&RuntimeStatus>,
    processes_count: usize,
    now: DateTime<Utc>,
) -> (Option<RuntimeStatus>, RuntimeHealth) {
    let status_age_seconds = status
        .and_then(|status| status.timestamp)
        .map(|ts| (now - ts).num_seconds().max(0));

    let mut overlaid = status.cloned();
    if let Some(current) = overlaid.as_mut()
        && current.is_active()
        && processes_count == 0
        && status_age_seconds.is_some_and(|age| age > ORPHAN_THRESHOLD_SECS)
    {
        current.status = Some("stopped_unexpected".to_string());
        current.last_action = Some("process_missing".to_string());
        current.exit_reason = Some("process_missing".to_string());
        current.derived = true;
    }

    let status_fresh = status_age_seconds.is_some_and(|age| age <= FRESH_THRESHOLD_SECS);
    let runtime_healthy = processes_count > 0
        && status_fresh
        && overlaid
            .as_ref()
            .is_some_and(|current| !current.is_terminal());

    (
        overlaid,
        RuntimeHealth {
            processes_count,
            status_age_seconds,
            status_fresh,
            runtime_healthy,
        },
    )
}

/// Non-authoritative explanation of the current state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiagnosticsSummary {
    pub source: String,
    pub generated_at: DateTime<Utc>,
    pub generated_age_seconds: Option<i64>,
    pub is_stale: bool,
    pub root_cause: String,
    pub recommendation: String,
}

/// Maps the (possibly overlaid) status fields and the 5-hour window onto a
/// root cause and a recommended next action, highest-priority rule first.
pub fn derive_diagnostics(
    status: Option<&RuntimeStatus>,
    health: &RuntimeHealth,
    five_hour: Option<&crate::quota::QuotaWindow>,
    now: DateTime<Utc>,
) -> DiagnosticsSummary {
    let generated_at = status.and_then(|status| status.timestamp).unwrap_or(now);
    let generated_age_seconds = status
        .and_then(|status| status.timestamp)
        .map(|ts| (now - ts).num_seconds().max(0));
    let is_stale = generated_age_seconds.is_none_or(|age| age > DIAGNOSTICS_STALE_SECS);

    let (root_cause, recommendation) = decide(status, health, five_hour);

    DiagnosticsSummary {
        source: if status.is_some() {
            "runtime_status".to_string()
        } else {
            "inference".to_string()
        },
        generated_at,
        generated_age_seconds,
        is_stale,
        root_cause: root_cause.to_string(),
        recommendation: recommendation.to_string(),
    }
}

fn decide(
    status: Option<&RuntimeStatus>,
    health: &RuntimeHealth,
    five_hour: Option<&crate::quota::QuotaWindow>,
) -> (&'static str, &'static str) {
    let Some(current) = status else {
        return (
            "No status file found; the loop has not reported anything yet",
            "Start the loop, or point the dashboard at the right project directory",
        );
    };

    if field_contains(current, &["permission", "denied"]) {
        return (
            "The agent CLI was denied permission for an action",
            "Review the loop's approval and sandbox settings, then restart it",
        );
    }
    if field_contains(current, &["timeout", "timed_out", "timed out"]) {
        return (
            "The last agent call timed out",
            "Check network connectivity and provider availability, then let the loop retry",
        );
    }
    let five_hour_exhausted = five_hour.is_some_and(|window| {
        window.status == WindowStatus::Limited || window.remaining_percent == Some(0.0)
    });
    if five_hour_exhausted || field_contains(current, &["rate_limit", "rate limit", "quota"]) {
        return (
            "The provider's rate limit is exhausted",
            "Wait for the 5-hour window to reset before resuming the loop",
        );
    }
    if current.status.as_deref() == Some("stopped_unexpected") {
        return (
            "The loop process disappeared without updating its status file",
            "Inspect the loop log for a crash, then restart the loop",
        );
    }
    if current.is_active() && !health.status_fresh {
        return (
            "The status file has gone stale while the loop claims to be active",
            "Verify the loop is still making progress; restart it if it is wedged",
        );
    }
    if matches!(
        current.status.as_deref(),
        Some("error") | Some("failed") | Some("halted")
    ) {
        return (
            "The loop stopped after an error",
            "Read the exit reason and the log tail, fix the cause, and restart",
        );
    }
    if current.status.as_deref() == Some("paused") {
        return (
            "The loop is paused",
            "Resume the loop when you are ready to continue",
        );
    }
    if current.is_active() {
        return ("The loop is running normally", "No action needed");
    }
    (
        "The loop is not running",
        "Start the loop to resume automation",
    )
}

fn field_contains(status: &RuntimeStatus, needles: &[&str]) -> bool {
    for field in [status.exit_reason.as_deref(), status.last_action.as_deref()] {
        let Some(value) = field else { continue };
        let lower = value.to_ascii_lowercase();
        if needles.iter().any(|needle| lower.contains(needle)) {
            return true;
        }
    }
    false
}
