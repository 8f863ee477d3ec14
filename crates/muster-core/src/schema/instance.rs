//! The instance record: one discovered workspace and its aggregated status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::assistant::AssistantStatus;
use super::review::ReviewStatus;

/// Version-control status for an instance, derived fresh each cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitInfo {
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    pub modified: u32,
    pub staged: u32,
    pub untracked: u32,
    pub dirty: bool,
}

/// Terminal-multiplexer session state for an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiplexerStatus {
    pub session_name: String,
    pub exists: bool,
}

/// Telemetry-stream health for an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryStatus {
    pub connected: bool,
    #[serde(default)]
    pub events_received: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
}

/// State pushed by the editor extension alongside heartbeats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_file: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
}

/// One discovered workspace and everything we know about it.
///
/// Identity is the filesystem path; the registry's map semantics guarantee
/// at most one live record per path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub name: String,
    pub path: String,
    pub is_version_controlled: bool,
    pub last_updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_info: Option<GitInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_status: Option<ReviewStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_status: Option<AssistantStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplexer_status: Option<MultiplexerStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry_status: Option<TelemetryStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension_state: Option<ExtensionState>,
    /// When the review status was last actually fetched. Carried forward
    /// across cycles that skip the fetch so re-check cadence stays accurate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_last_updated: Option<DateTime<Utc>>,
}

impl Instance {
    /// A bare instance for a freshly discovered path.
    pub fn discovered(path: &str, now: DateTime<Utc>) -> Self {
        let name = std::path::Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        Self {
            name,
            path: path.to_string(),
            is_version_controlled: false,
            last_updated: now,
            git_info: None,
            review_status: None,
            assistant_status: None,
            multiplexer_status: None,
            proxy_host: None,
            telemetry_status: None,
            extension_state: None,
            review_last_updated: None,
        }
    }

    /// Current branch, if version control status is known.
    pub fn branch(&self) -> Option<&str> {
        self.git_info.as_ref().map(|g| g.branch.as_str())
    }

    /// True when any assistant session is actively doing something.
    pub fn assistant_active(&self) -> bool {
        self.assistant_status
            .as_ref()
            .is_some_and(|a| a.any_active())
    }
}
