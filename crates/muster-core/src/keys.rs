//! Coordination-store key and channel layout.
//!
//! Every key the daemon touches is built here so consumers and the daemon
//! can never drift apart on naming. Per-record TTLs live next to the keys
//! they govern: published state is a live-status cache, not a system of
//! record, so everything expires.

/// Set of currently-published instance paths.
pub const INSTANCES_SET: &str = "muster:instances";

/// Set of workspace paths reported open by editor integrations.
pub const WORKSPACES_SET: &str = "muster:workspaces";

/// Timestamp of the last snapshot publish (RFC 3339).
pub const UPDATED_AT: &str = "muster:updated_at";

/// Daemon singleton lock.
pub const DAEMON_LOCK: &str = "muster:daemon:lock";

/// TTL for per-instance records, seconds.
pub const INSTANCE_TTL_SECS: u64 = 300;

/// TTL for worktree job records, seconds.
pub const JOB_TTL_SECS: u64 = 3600;

/// TTL for the daemon lock; renewed at a third of this while held.
pub const DAEMON_LOCK_TTL_SECS: u64 = 30;

/// TTL for per-target worktree job locks.
pub const JOB_LOCK_TTL_SECS: u64 = 600;

/// TTL for terminal-context side-channel entries.
pub const TERMINAL_CONTEXT_TTL_SECS: u64 = 86_400;

/// Record for a single instance, keyed by workspace path.
pub fn instance_key(path: &str) -> String {
    format!("muster:instance:{path}")
}

/// Record for a worktree job.
pub fn job_key(job_id: &str) -> String {
    format!("muster:job:{job_id}")
}

/// Per-target worktree job lock.
pub fn job_lock_key(target: &str) -> String {
    format!("muster:job:lock:{target}")
}

/// Terminal identity side channel, keyed by assistant process id.
pub fn terminal_context_key(pid: u32) -> String {
    format!("muster:terminal:{pid}")
}

/// Channels.
pub mod channels {
    /// Lightweight "snapshot updated, N instances" notifications.
    pub const INSTANCES_UPDATED: &str = "muster:events:instances-updated";

    /// Consumer-requested forced refresh.
    pub const REFRESH: &str = "muster:events:refresh";

    /// Assistant lifecycle events from hook integrations.
    pub const ASSISTANT: &str = "muster:events:assistant";

    /// Editor heartbeats (carry the workspace path).
    pub const HEARTBEAT: &str = "muster:events:heartbeat";

    /// Worktree job requests.
    pub const JOB_REQUEST: &str = "muster:events:job-request";

    /// User-facing notifications (check failures, merge conflicts, ...).
    pub const NOTIFY: &str = "muster:events:notify";

    /// Status changes for every worktree job. Requesters watch this to
    /// learn the job id assigned to their target, then follow the job's
    /// own progress channel or poll its record.
    pub const JOBS: &str = "muster:events:jobs";

    /// Streaming progress for one worktree job.
    pub fn job_progress(job_id: &str) -> String {
        format!("muster:events:job-progress:{job_id}")
    }

    /// Channels the daemon subscribes to at startup.
    pub fn daemon_subscriptions() -> Vec<String> {
        vec![
            REFRESH.to_string(),
            ASSISTANT.to_string(),
            HEARTBEAT.to_string(),
            JOB_REQUEST.to_string(),
        ]
    }

    /// Channels whose traffic counts as user activity for adaptive polling.
    pub fn is_activity_channel(channel: &str) -> bool {
        matches!(channel, REFRESH | ASSISTANT | HEARTBEAT)
    }
}
