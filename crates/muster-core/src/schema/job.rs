//! Worktree job records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal or in-flight state of a worktree job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    /// The per-target lock was held by another job; duplicates are rejected,
    /// not queued.
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// One "materialize a worktree" job. Immutable once terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeJob {
    pub job_id: String,
    pub target: String,
    pub source_repo: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_ref: Option<String>,
    pub status: JobStatus,
    /// Accumulated output from the underlying creation process.
    #[serde(default)]
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorktreeJob {
    /// A new job in `Running` state.
    pub fn running(
        job_id: String,
        target: String,
        source_repo: String,
        base_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            target,
            source_repo,
            base_ref,
            status: JobStatus::Running,
            output: String::new(),
            result_path: None,
            error: None,
            started_at: now,
            completed_at: None,
        }
    }
}
