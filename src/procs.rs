use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// One OS process matching a provider's command pattern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub ppid: u32,
    pub elapsed_seconds: Option<i64>,
    pub command: String,
}

/// Lists live processes whose command line contains `pattern`. Failures of
/// the underlying `ps` call yield an empty list, never an error.
pub fn list_processes(pattern: &str) -> Vec<ProcessInfo> {
    let output = Command::new("ps")
        .args(["-axo", "pid=,ppid=,etime=,command="])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output();

    let output = match output {
        Ok(output) if output.status.success() => output,
        Ok(_) | Err(_) => {
            debug!("process listing unavailable");
            return Vec::new();
        }
    };

    let text = String::from_utf8_lossy(&output.stdout);
    parse_ps_output(&text, pattern)
}

fn parse_ps_output(text: &str, pattern: &str) -> Vec<ProcessInfo> {
    let own_pid = std::process::id();
    let mut processes = Vec::new();

    for line in text.lines() {
        let mut fields = line.split_whitespace();
        let (Some(pid), Some(ppid), Some(etime)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let command = fields.collect::<Vec<_>>().join(" ");
        let (Ok(pid), Ok(ppid)) = (pid.parse::<u32>(), ppid.parse::<u32>()) else {
            continue;
        };
        if pid == own_pid || !command.contains(pattern) {
            continue;
        }
        processes.push(ProcessInfo {
            pid,
            ppid,
            elapsed_seconds: parse_etime(etime),
            command,
        });
    }
    processes
}

/// Parses `ps` elapsed-time values: `MM:SS`, `HH:MM:SS`, or `D-HH:MM:SS`.
pub fn parse_etime(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (days, clock) = match raw.split_once('-') {
        Some((days, rest)) => (days.parse::<i64>().ok()?, rest),
        None => (0, raw),
    };

    let parts: Vec<i64> = clock
        .split(':')
        .map(|part| part.parse::<i64>())
        .collect::<Result<_, _>>()
        .ok()?;
    let seconds = match parts.as_slice() {
        [minutes, seconds] => minutes * 60 + seconds,
        [hours, minutes, seconds] => hours * 3600 + minutes * 60 + seconds,
        _ => return None,
    };
    Some(days * 86_400 + seconds)
}
