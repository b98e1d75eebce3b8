use std::fs;
use std::path::Path;
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Reads a text artifact, treating a missing or unreadable file as absent.
pub fn read_text(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(err) => {
            if path.exists() {
                debug!(path = %path.display(), error = %err, "artifact unreadable");
            }
            None
        }
    }
}

/// JSON-flavored read: absent on missing file or parse failure.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = read_text(path)?;
    match serde_json::from_str(&raw) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "artifact is not valid JSON");
            None
        }
    }
}

/// The last `max_lines` non-empty lines of a text artifact, oldest first.
pub fn read_tail(path: &Path, max_lines: usize) -> Vec<String> {
    let Some(content) = read_text(path) else {
        return Vec::new();
    };
    let mut tail: Vec<String> = content
        .lines()
        .rev()
        .filter(|line| !line.trim().is_empty())
        .take(max_lines)
        .map(ToString::to_string)
        .collect();
    tail.reverse();
    tail
}

/// Persists a text artifact, creating parent directories as needed.
pub fn write_text(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value)?;
    write_text(path, &payload)
}

pub fn modified_at(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}
