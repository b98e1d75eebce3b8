use std::env;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const CONFIG_SCHEMA_VERSION: u32 = 2;
const DEFAULT_STATE_DIR_NAME: &str = ".ralph";
const DEFAULT_SNAPSHOT_STALE_SECONDS: u64 = 300;
const DEFAULT_POLL_SECONDS: u64 = 3;

/// The agent CLIs a Ralph loop can drive. A closed set: callers query the
/// capability table instead of comparing strings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[default]
    Codex,
    Gemini,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.spec().cli_name)
    }
}

/// Per-provider defaults and feature flags, carried as data.
#[derive(Debug, Clone, Copy)]
pub struct ProviderSpec {
    pub cli_name: &'static str,
    pub process_pattern: &'static str,
    pub default_script: &'static str,
    pub log_file: &'static str,
    pub stderr_prefix: &'static str,
    pub supports_quota_snapshot: bool,
    pub supports_session_journal: bool,
    pub supports_diagnostics_refresh: bool,
    pub exposes_quota_in_logs: bool,
}

const CODEX_SPEC: ProviderSpec = ProviderSpec {
    cli_name: "codex",
    process_pattern: "codex",
    default_script: "ralph-codex.sh",
    log_file: "ralph.log",
    stderr_prefix: "codex-stderr",
    supports_quota_snapshot: true,
    supports_session_journal: true,
    supports_diagnostics_refresh: true,
    exposes_quota_in_logs: true,
};

const GEMINI_SPEC: ProviderSpec = ProviderSpec {
    cli_name: "gemini",
    process_pattern: "gemini",
    default_script: "ralph-gemini.sh",
    log_file: "ralph.log",
    stderr_prefix: "gemini-stderr",
    supports_quota_snapshot: false,
    supports_session_journal: false,
    supports_diagnostics_refresh: false,
    exposes_quota_in_logs: false,
};

impl Provider {
    pub fn spec(self) -> &'static ProviderSpec {
        match self {
            Self::Codex => &CODEX_SPEC,
            Self::Gemini => &GEMINI_SPEC,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashConfig {
    pub schema_version: u32,
    pub default_provider: Provider,
    pub state_dir_name: String,
    pub snapshot_stale_seconds: u64,
    pub poll_interval_seconds: u64,
}

impl Default for DashConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            default_provider: Provider::Codex,
            state_dir_name: DEFAULT_STATE_DIR_NAME.to_string(),
            snapshot_stale_seconds: DEFAULT_SNAPSHOT_STALE_SECONDS,
            poll_interval_seconds: DEFAULT_POLL_SECONDS,
        }
    }
}

impl DashConfig {
    pub fn load_or_init() -> Result<Self> {
        let cfg_path = config_path();
        if let Some(parent) = cfg_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory {}", parent.display())
            })?;
        }

        if cfg_path.exists() {
            let raw = fs::read_to_string(&cfg_path)
                .with_context(|| format!("failed to read {}", cfg_path.display()))?;
            let mut parsed: DashConfig = serde_json::from_str(&raw)
                .with_context(|| format!("invalid JSON in {}", cfg_path.display()))?;
            if parsed.normalize_and_migrate() {
                parsed.save()?;
            }
            Ok(parsed)
        } else {
            let cfg = DashConfig::default();
            cfg.save()?;
            Ok(cfg)
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory {}", parent.display())
            })?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&path, data).with_context(|| format!("failed to write {}", path.display()))
    }

    fn normalize_and_migrate(&mut self) -> bool {
        let mut changed = false;
        if self.schema_version < CONFIG_SCHEMA_VERSION {
            self.schema_version = CONFIG_SCHEMA_VERSION;
            changed = true;
        }
        if self.state_dir_name.trim().is_empty() {
            self.state_dir_name = DEFAULT_STATE_DIR_NAME.to_string();
            changed = true;
        }
        if self.snapshot_stale_seconds == 0 {
            self.snapshot_stale_seconds = DEFAULT_SNAPSHOT_STALE_SECONDS;
            changed = true;
        }
        if self.poll_interval_seconds == 0 {
            self.poll_interval_seconds = DEFAULT_POLL_SECONDS;
            changed = true;
        }
        changed
    }

    /// Snapshot-staleness cutoff; `RALPH_DASH_STALE_SECONDS` overrides the
    /// configured value.
    pub fn snapshot_stale(&self) -> Duration {
        Duration::from_secs(env_u64(
            "RALPH_DASH_STALE_SECONDS",
            self.snapshot_stale_seconds,
        ))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(env_u64(
            "RALPH_DASH_POLL_SECONDS",
            self.poll_interval_seconds,
        ))
    }
}

pub fn dash_home() -> PathBuf {
    if let Ok(custom) = env::var("RALPH_DASH_HOME") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ralph-dash")
}

pub fn config_path() -> PathBuf {
    dash_home().join("config.json")
}

pub fn cache_dir() -> PathBuf {
    dash_home().join("cache")
}

pub fn codex_home() -> PathBuf {
    if let Ok(custom) = env::var("CODEX_HOME") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".codex")
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_table_diverges_per_provider() {
        let codex = Provider::Codex.spec();
        assert!(codex.supports_quota_snapshot);
        assert!(codex.supports_session_journal);
        assert!(codex.exposes_quota_in_logs);

        let gemini = Provider::Gemini.spec();
        assert!(!gemini.supports_quota_snapshot);
        assert!(!gemini.supports_session_journal);
        assert!(!gemini.supports_diagnostics_refresh);
        assert_eq!(gemini.stderr_prefix, "gemini-stderr");
    }

    #[test]
    fn migration_fills_zeroed_fields() {
        let mut cfg = DashConfig {
            schema_version: 1,
            default_provider: Provider::Gemini,
            state_dir_name: "  ".to_string(),
            snapshot_stale_seconds: 0,
            poll_interval_seconds: 0,
        };

        assert!(cfg.normalize_and_migrate());
        assert_eq!(cfg.schema_version, CONFIG_SCHEMA_VERSION);
        assert_eq!(cfg.state_dir_name, DEFAULT_STATE_DIR_NAME);
        assert_eq!(cfg.snapshot_stale_seconds, DEFAULT_SNAPSHOT_STALE_SECONDS);
        assert_eq!(cfg.default_provider, Provider::Gemini);
    }

    #[test]
    fn defaults_are_stable() {
        let mut cfg = DashConfig::default();
        assert_eq!(cfg.snapshot_stale_seconds, 300);
        assert_eq!(cfg.poll_interval_seconds, 3);
        assert!(!cfg.normalize_and_migrate());
    }

    #[test]
    fn provider_display_uses_cli_name() {
        assert_eq!(Provider::Codex.to_string(), "codex");
        assert_eq!(Provider::Gemini.to_string(), "gemini");
    }
}
