//! Configuration loading.
//!
//! TOML file with per-section defaults, resolved from an explicit path,
//! `$MUSTER_CONFIG`, or `~/.config/muster/config.toml` in that order. A
//! missing file is not an error; every knob has a default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Complete configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub worktree: WorktreeConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

/// Coordination-store connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL.
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Polling cadences, seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Main-loop interval while the user is active.
    pub active_interval_secs: u64,
    /// Main-loop interval after the idle threshold elapses.
    pub idle_interval_secs: u64,
    /// How long without activity before the loop drops to the idle interval.
    pub idle_threshold_secs: u64,
    /// Fixed cadence for the assistant process-table scan.
    pub process_scan_interval_secs: u64,
    /// Fixed cadence for the expensive workspace-enumeration pass.
    pub enumeration_interval_secs: u64,
    /// Per-instance staleness gate: skip enrichment fresher than this.
    pub stale_after_secs: u64,
    /// Minimum gap between durable snapshot writes.
    pub min_publish_interval_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            active_interval_secs: 10,
            idle_interval_secs: 60,
            idle_threshold_secs: 300,
            process_scan_interval_secs: 120,
            enumeration_interval_secs: 300,
            stale_after_secs: 5,
            min_publish_interval_secs: 30,
        }
    }
}

/// Review polling and rate-limit thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    pub enabled: bool,
    /// Remaining quota at or below which review polling pauses entirely.
    pub critical_remaining: u64,
    /// Remaining quota at or below which polling slows to 5 minutes.
    pub low_remaining: u64,
    /// Remaining quota at or below which polling slows to 2 minutes.
    pub caution_remaining: u64,
    /// Minimum gap between rate-limit queries.
    pub rate_check_interval_secs: u64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            critical_remaining: 50,
            low_remaining: 200,
            caution_remaining: 500,
            rate_check_interval_secs: 30,
        }
    }
}

/// Assistant session tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Process name to match in the process-table scan.
    pub process_name: String,
    /// A working session stuck longer than this resets to idle.
    pub work_timeout_secs: u64,
    /// A waiting session inactive longer than this resets to idle.
    pub wait_timeout_secs: u64,
    /// Finished sessions older than this are pruned.
    pub finished_retention_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            process_name: "claude".to_string(),
            work_timeout_secs: 600,
            wait_timeout_secs: 1800,
            finished_retention_secs: 3600,
        }
    }
}

/// Worktree job execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorktreeConfig {
    /// Directory new worktrees are created under. Defaults to a `worktrees`
    /// directory next to the source repository.
    pub root: Option<PathBuf>,
}

/// Reverse-proxy config API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Admin API base, e.g. `http://127.0.0.1:2019`. Unset disables the probe.
    pub admin_url: Option<String>,
}

/// Telemetry-stream health checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Health endpoint template; `{host}` is replaced with the proxy host.
    /// Unset disables the probe.
    pub health_url_template: Option<String>,
}

/// Workspace discovery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Optional external enumeration command, run on the slow enumeration
    /// cadence; must print one workspace path per line.
    pub command: Option<String>,
}

/// Overrides from the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub store_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

fn default_config_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MUSTER_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("muster").join("config.toml"))
}

fn load_file(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolve the effective configuration.
///
/// An explicitly named file must exist and parse; the default location is
/// optional and silently skipped when absent.
pub fn resolve_config(overrides: &ConfigOverrides) -> Result<Config, ConfigError> {
    let mut config = match &overrides.config_path {
        Some(path) => load_file(path)?,
        None => match default_config_path() {
            Some(path) if path.exists() => load_file(&path)?,
            _ => Config::default(),
        },
    };

    if let Some(url) = &overrides.store_url {
        config.store.url = url.clone();
    }

    Ok(config)
}
