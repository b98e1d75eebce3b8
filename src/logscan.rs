use std::cmp::Reverse;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use std::time::SystemTime;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::artifacts;
use crate::quota::{QuotaWindow, WindowStatus};
use crate::text;

const LOG_TAIL_LINES: usize = 400;
const STDERR_TAIL_LINES: usize = 200;
const MAX_STDERR_FILES: usize = 3;

static FIVE_HOUR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)5\s*-?\s*hour|\b5h\b|usage limit reached|try again in about an hour")
        .expect("valid regex")
});
static WEEKLY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)weekly|week limit|7\s*-?\s*day").expect("valid regex"));
static LIMITED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)limit reached|exceeded|blocked|try again").expect("valid regex")
});

/// Binary-ish quota evidence for one window: a status plus the last log
/// line that produced it. Never carries percentages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogWindow {
    pub status: WindowStatus,
    pub line: Option<String>,
    pub explanation: Option<String>,
}

impl LogWindow {
    pub fn to_window(&self) -> QuotaWindow {
        QuotaWindow {
            status: self.status,
            remaining_percent: None,
            usage_percent: None,
            reset_label: None,
            line: self
                .line
                .clone()
                .or_else(|| self.explanation.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogQuota {
    pub five_hour: LogWindow,
    pub weekly: LogWindow,
}

impl LogQuota {
    pub fn has_signal(&self) -> bool {
        self.five_hour.line.is_some() || self.weekly.line.is_some()
    }
}

/// Concatenates the bounded tail of the primary loop log with the tails of
/// the most recent provider-stderr captures.
pub fn gather_corpus(state_dir: &Path, log_file: &str, stderr_prefix: &str) -> Vec<String> {
    let mut corpus = artifacts::read_tail(&state_dir.join(log_file), LOG_TAIL_LINES);

    let mut stderr_files: Vec<(std::path::PathBuf, SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(state_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(stderr_prefix) {
                continue;
            }
            let Ok(modified) = entry.metadata().and_then(|meta| meta.modified()) else {
                continue;
            };
            stderr_files.push((entry.path(), modified));
        }
    }
    stderr_files.sort_by_key(|(_, modified)| Reverse(*modified));
    stderr_files.truncate(MAX_STDERR_FILES);

    for (path, _) in stderr_files {
        corpus.extend(artifacts::read_tail(&path, STDERR_TAIL_LINES));
    }
    corpus
}

/// Scans backward for the last line matching each window's phrase set. A
/// matched line classifies as limited when it carries a limit/blocked
/// phrase, otherwise ok; no match yields unknown with an explanation.
pub fn scan_quota(corpus: &[String], metric_exposed: bool, cli_name: &str) -> LogQuota {
    LogQuota {
        five_hour: scan_window(corpus, &FIVE_HOUR_RE, metric_exposed, cli_name, "5-hour"),
        weekly: scan_window(corpus, &WEEKLY_RE, metric_exposed, cli_name, "weekly"),
    }
}

fn scan_window(
    corpus: &[String],
    window_re: &Regex,
    metric_exposed: bool,
    cli_name: &str,
    window_name: &str,
) -> LogWindow {
    for raw in corpus.iter().rev() {
        let line = text::normalize(raw);
        if line.is_empty() || !window_re.is_match(&line) {
            continue;
        }
        let status = if LIMITED_RE.is_match(&line) {
            WindowStatus::Limited
        } else {
            WindowStatus::Ok
        };
        return LogWindow {
            status,
            line: Some(line),
            explanation: None,
        };
    }

    let explanation = if metric_exposed {
        format!("no {window_name} quota signal found in recent logs")
    } else {
        format!("the {cli_name} CLI does not expose this metric")
    };
    LogWindow {
        status: WindowStatus::Unknown,
        line: None,
        explanation: Some(explanation),
    }
}
