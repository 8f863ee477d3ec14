//! Assistant session tracking.
//!
//! Per-repository multi-session state machine for the external assistant
//! process, fed by two inputs: lifecycle events published by hook
//! integrations, and a periodic process-table scan. Timeout recovery runs
//! each enrichment cycle so a crashed hook can never wedge a session in
//! `working` forever.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use muster_core::config::AssistantConfig;
use muster_core::schema::{
    AssistantSession, AssistantStatus, SessionStatus, TerminalIdentity,
};
use tracing::debug;

use crate::probes::AssistantProcess;

/// Lifecycle events from the assistant's hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleKind {
    Started,
    Waiting,
    Compacting,
    Stopped,
}

impl LifecycleKind {
    fn target_status(self) -> SessionStatus {
        match self {
            Self::Started => SessionStatus::Working,
            Self::Waiting => SessionStatus::Waiting,
            Self::Compacting => SessionStatus::Compacting,
            // A stop event ends the turn, not the process.
            Self::Stopped => SessionStatus::Idle,
        }
    }
}

/// Tracks assistant sessions for every registered repository path.
pub struct SessionTracker {
    config: AssistantConfig,
    statuses: HashMap<String, AssistantStatus>,
}

impl SessionTracker {
    pub fn new(config: AssistantConfig) -> Self {
        Self {
            config,
            statuses: HashMap::new(),
        }
    }

    pub fn status_for(&self, path: &str) -> Option<&AssistantStatus> {
        self.statuses.get(path)
    }

    /// Restore state persisted before a daemon restart.
    pub fn restore(&mut self, path: &str, status: AssistantStatus) {
        self.statuses.insert(path.to_string(), status);
    }

    /// Drop all state for a removed instance.
    pub fn remove(&mut self, path: &str) {
        self.statuses.remove(path);
    }

    /// Apply one lifecycle event.
    ///
    /// With a process id: look up or create that session, move it to the
    /// event's status, stamp activity, and promote it to primary.
    /// `work_started_at` is set only on the transition into `working`, so
    /// repeated start events keep the original start time. Without a
    /// process id (legacy emitters) the event applies to the current
    /// primary session only.
    pub fn apply_event(
        &mut self,
        path: &str,
        kind: LifecycleKind,
        pid: Option<u32>,
        terminal: Option<TerminalIdentity>,
        now: DateTime<Utc>,
    ) {
        let status = self.statuses.entry(path.to_string()).or_default();

        let pid = match pid {
            Some(pid) => pid,
            None => match status.primary_session {
                Some(primary) => primary,
                None => {
                    // Nothing to attach a legacy event to; track it under a
                    // synthetic session so the state is not lost.
                    0
                }
            },
        };

        let session = status
            .sessions
            .entry(pid)
            .or_insert_with(|| AssistantSession::new(pid, SessionStatus::Idle, now));

        let target = kind.target_status();
        if target == SessionStatus::Working && session.status != SessionStatus::Working {
            session.work_started_at = Some(now);
        }
        if target != SessionStatus::Working {
            session.work_started_at = None;
        }
        session.status = target;
        session.last_activity = now;
        session.finished_at = None;
        if terminal.is_some() {
            session.terminal = terminal;
        }

        status.primary_session = Some(pid);
        debug!("Assistant event {kind:?} for {path} (pid {pid})");
    }

    /// Merge a process-table scan.
    ///
    /// Every matching running process either refreshes its existing session
    /// or appears as a new idle one; every tracked session whose process is
    /// gone is marked finished. Sessions created from legacy events (pid 0)
    /// are outside the scan's authority.
    pub fn apply_scan(
        &mut self,
        tracked_paths: &[String],
        processes: &[AssistantProcess],
        now: DateTime<Utc>,
    ) {
        let running: HashSet<u32> = processes.iter().map(|p| p.pid).collect();

        for path in tracked_paths {
            let matching: Vec<&AssistantProcess> = processes
                .iter()
                .filter(|p| cwd_belongs_to(&p.cwd, path))
                .collect();

            if !self.statuses.contains_key(path) {
                if matching.is_empty() {
                    continue;
                }
                self.statuses.insert(path.clone(), AssistantStatus::default());
            }
            let Some(status) = self.statuses.get_mut(path) else {
                continue;
            };

            for process in &matching {
                match status.sessions.get_mut(&process.pid) {
                    Some(session) => {
                        // Known session: preserve its state, refresh liveness.
                        session.last_activity = now;
                        if session.host_pid.is_none() {
                            session.host_pid = process.host_pid;
                        }
                    }
                    None => {
                        let mut session =
                            AssistantSession::new(process.pid, SessionStatus::Idle, now);
                        session.host_pid = process.host_pid;
                        status.sessions.insert(process.pid, session);
                        debug!("Discovered assistant pid {} in {path}", process.pid);
                    }
                }
            }

            for session in status.sessions.values_mut() {
                if session.process_id != 0
                    && session.status != SessionStatus::Finished
                    && !running.contains(&session.process_id)
                {
                    session.status = SessionStatus::Finished;
                    session.finished_at = Some(now);
                    session.work_started_at = None;
                    debug!(
                        "Assistant pid {} in {path} no longer running; finished",
                        session.process_id
                    );
                }
            }

            status.elect_primary();
        }
    }

    /// Drop state for paths with no registered instance.
    ///
    /// Lifecycle events can arrive for a path that is never enrolled as a
    /// workspace; those entries are kept through the retention window in
    /// case enrollment is merely in flight, then discarded so stray
    /// emitters cannot grow the map without bound.
    pub fn prune_untracked(&mut self, registered: &HashSet<String>, now: DateTime<Utc>) {
        let retention = Duration::seconds(self.config.finished_retention_secs as i64);
        self.statuses.retain(|path, status| {
            if registered.contains(path) {
                return true;
            }
            status
                .sessions
                .values()
                .map(|s| s.last_activity)
                .max()
                .is_some_and(|last| now - last <= retention)
        });
    }

    /// Timeout sweep for one path. Returns `true` when anything changed.
    ///
    /// Stuck `working` sessions reset to idle after the work timeout; stale
    /// `waiting` sessions after the (longer) wait timeout; `finished`
    /// sessions past the retention window are deleted.
    pub fn sweep(&mut self, path: &str, now: DateTime<Utc>) -> bool {
        let Some(status) = self.statuses.get_mut(path) else {
            return false;
        };

        let work_timeout = Duration::seconds(self.config.work_timeout_secs as i64);
        let wait_timeout = Duration::seconds(self.config.wait_timeout_secs as i64);
        let retention = Duration::seconds(self.config.finished_retention_secs as i64);

        let mut changed = false;
        let mut to_remove = Vec::new();

        for session in status.sessions.values_mut() {
            match session.status {
                SessionStatus::Working => {
                    if let Some(started) = session.work_started_at
                        && now - started > work_timeout
                    {
                        session.status = SessionStatus::Idle;
                        session.work_started_at = None;
                        changed = true;
                    }
                }
                SessionStatus::Waiting => {
                    if now - session.last_activity > wait_timeout {
                        session.status = SessionStatus::Idle;
                        changed = true;
                    }
                }
                SessionStatus::Finished => {
                    let finished_at = session.finished_at.unwrap_or(session.last_activity);
                    if now - finished_at > retention {
                        to_remove.push(session.process_id);
                    }
                }
                _ => {}
            }
        }

        for pid in to_remove {
            status.sessions.remove(&pid);
            changed = true;
        }

        if changed {
            status.elect_primary();
        }
        changed
    }
}

/// Whether a process working directory belongs to a tracked workspace.
fn cwd_belongs_to(cwd: &Path, workspace: &str) -> bool {
    cwd.starts_with(workspace)
}
