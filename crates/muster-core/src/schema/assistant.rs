//! Assistant session tracking records.
//!
//! One `AssistantStatus` per instance, holding every known session of the
//! external assistant process keyed by OS process id. The flat
//! "what is the assistant doing" view is always derived from
//! `sessions` + `primary_session`; it is never stored redundantly.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::review::CheckConclusion;

/// What a single assistant session is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Working,
    Waiting,
    Compacting,
    Idle,
    Finished,
    /// Presentation-only: an idle/finished session shown while CI is still
    /// running for the instance. Never stored by the tracker.
    Checking,
}

impl SessionStatus {
    /// True for states that represent the assistant actively doing something.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Working | Self::Waiting | Self::Compacting)
    }
}

/// Terminal identity for a session, resolved from events or the
/// terminal-context side channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalIdentity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// One running (or recently finished) assistant process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantSession {
    pub process_id: u32,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<TerminalIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_pid: Option<u32>,
    pub last_activity: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl AssistantSession {
    /// A fresh session in the given status.
    pub fn new(process_id: u32, status: SessionStatus, now: DateTime<Utc>) -> Self {
        Self {
            process_id,
            status,
            terminal: None,
            host_pid: None,
            last_activity: now,
            work_started_at: None,
            finished_at: None,
        }
    }
}

/// Aggregate assistant state for one instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantStatus {
    #[serde(default)]
    pub sessions: BTreeMap<u32, AssistantSession>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_session: Option<u32>,
}

impl AssistantStatus {
    /// Re-elect the primary session: the most recently active non-finished
    /// session, or any remaining session when all are finished.
    pub fn elect_primary(&mut self) {
        let best_live = self
            .sessions
            .values()
            .filter(|s| s.status != SessionStatus::Finished)
            .max_by_key(|s| s.last_activity)
            .map(|s| s.process_id);
        self.primary_session = best_live.or_else(|| {
            self.sessions
                .values()
                .max_by_key(|s| s.last_activity)
                .map(|s| s.process_id)
        });
    }

    /// The session currently elected primary.
    pub fn primary(&self) -> Option<&AssistantSession> {
        self.primary_session.and_then(|pid| self.sessions.get(&pid))
    }

    /// True when any session is actively working/waiting/compacting.
    pub fn any_active(&self) -> bool {
        self.sessions.values().any(|s| s.status.is_active())
    }

    /// Presentation projection: while the instance's checks are still
    /// pending, idle and finished sessions display as `checking`. Active
    /// sessions are never reclassified. The stored tracker state is not
    /// touched; callers publish the projection.
    pub fn projected(&self, review_conclusion: Option<CheckConclusion>) -> AssistantStatus {
        if review_conclusion != Some(CheckConclusion::Pending) {
            return self.clone();
        }
        let mut out = self.clone();
        for session in out.sessions.values_mut() {
            if matches!(session.status, SessionStatus::Idle | SessionStatus::Finished) {
                session.status = SessionStatus::Checking;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn status_with(sessions: Vec<AssistantSession>) -> AssistantStatus {
        let mut status = AssistantStatus::default();
        for s in sessions {
            status.sessions.insert(s.process_id, s);
        }
        status.elect_primary();
        status
    }

    #[test]
    fn primary_prefers_most_recent_non_finished() {
        let now = Utc::now();
        let mut old = AssistantSession::new(100, SessionStatus::Idle, now - Duration::minutes(5));
        old.last_activity = now - Duration::minutes(5);
        let recent_finished = {
            let mut s = AssistantSession::new(200, SessionStatus::Finished, now);
            s.finished_at = Some(now);
            s
        };
        let status = status_with(vec![old, recent_finished]);
        // Finished session is newer but must not win while a live one exists.
        assert_eq!(status.primary_session, Some(100));
    }

    #[test]
    fn primary_falls_back_to_finished_when_nothing_else() {
        let now = Utc::now();
        let mut s = AssistantSession::new(300, SessionStatus::Finished, now);
        s.finished_at = Some(now);
        let status = status_with(vec![s]);
        assert_eq!(status.primary_session, Some(300));
    }

    #[test]
    fn primary_is_none_without_sessions() {
        let mut status = AssistantStatus::default();
        status.elect_primary();
        assert_eq!(status.primary_session, None);
    }

    #[test]
    fn primary_is_always_a_present_key() {
        let now = Utc::now();
        let status = status_with(vec![
            AssistantSession::new(1, SessionStatus::Working, now),
            AssistantSession::new(2, SessionStatus::Waiting, now - Duration::seconds(30)),
        ]);
        let pid = status.primary_session.unwrap();
        assert!(status.sessions.contains_key(&pid));
    }

    #[test]
    fn projection_reclassifies_idle_while_checks_pending() {
        let now = Utc::now();
        let status = status_with(vec![
            AssistantSession::new(1, SessionStatus::Idle, now),
            AssistantSession::new(2, SessionStatus::Working, now),
        ]);
        let projected = status.projected(Some(CheckConclusion::Pending));
        assert_eq!(projected.sessions[&1].status, SessionStatus::Checking);
        // Active sessions must not be clobbered.
        assert_eq!(projected.sessions[&2].status, SessionStatus::Working);
        // Source of truth untouched.
        assert_eq!(status.sessions[&1].status, SessionStatus::Idle);
    }

    #[test]
    fn projection_is_identity_when_checks_settled() {
        let now = Utc::now();
        let status = status_with(vec![AssistantSession::new(1, SessionStatus::Idle, now)]);
        assert_eq!(status.projected(Some(CheckConclusion::Success)), status);
        assert_eq!(status.projected(None), status);
    }
}
