//! Pub/sub event payloads.
//!
//! Every channel payload is one variant of [`StoreEvent`], discriminated by
//! an explicit `type` field. Payloads are decoded at the subscription
//! boundary with [`decode_event`]; a payload that does not parse is a
//! malformed-event error, never a silently ignored blob.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::assistant::TerminalIdentity;

/// A decoded pub/sub event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StoreEvent {
    /// Assistant began working on a prompt.
    #[serde(rename_all = "camelCase")]
    AssistantStarted {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        terminal: Option<TerminalIdentity>,
    },
    /// Assistant is blocked on user input.
    #[serde(rename_all = "camelCase")]
    AssistantWaiting {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        terminal: Option<TerminalIdentity>,
    },
    /// Assistant is compacting its context.
    #[serde(rename_all = "camelCase")]
    AssistantCompacting {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        terminal: Option<TerminalIdentity>,
    },
    /// Assistant finished its turn.
    #[serde(rename_all = "camelCase")]
    AssistantStopped {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        terminal: Option<TerminalIdentity>,
    },
    /// Editor heartbeat for an open workspace. A reported `branch` is
    /// fresher than the last probe and overrides it until the next one.
    #[serde(rename_all = "camelCase")]
    Heartbeat {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        active_file: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
    },
    /// Consumer asked for an immediate refresh (optionally one path).
    #[serde(rename_all = "camelCase")]
    Refresh {
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Request to materialize a new worktree.
    #[serde(rename_all = "camelCase")]
    JobRequest {
        target: String,
        source_repo: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        base_ref: Option<String>,
    },
    /// One chunk of output from a running worktree job.
    #[serde(rename_all = "camelCase")]
    JobProgress { job_id: String, chunk: String },
    /// A worktree job changed status; the full record is in the store.
    /// `target` lets requesters correlate the server-assigned job id with
    /// the request they published.
    #[serde(rename_all = "camelCase")]
    JobStatusChanged {
        job_id: String,
        target: String,
        status: crate::schema::JobStatus,
    },
    /// Snapshot republished; consumers re-fetch rather than receiving it inline.
    #[serde(rename_all = "camelCase")]
    InstancesUpdated { count: usize },
    /// User-facing notification (check failure, merge conflict, ...).
    #[serde(rename_all = "camelCase")]
    Notification {
        kind: String,
        title: String,
        body: String,
        path: String,
    },
}

/// A payload that failed to decode.
#[derive(Debug, Error)]
#[error("malformed event on channel {channel}: {source}")]
pub struct EventDecodeError {
    pub channel: String,
    #[source]
    pub source: serde_json::Error,
}

/// Decode one raw pub/sub payload.
pub fn decode_event(channel: &str, payload: &str) -> Result<StoreEvent, EventDecodeError> {
    serde_json::from_str(payload).map_err(|source| EventDecodeError {
        channel: channel.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_started_round_trips() {
        let event = StoreEvent::AssistantStarted {
            path: "/home/dev/proj".to_string(),
            pid: Some(4242),
            terminal: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"assistantStarted\""));
        let back = decode_event("muster:events:assistant", &json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn job_request_decodes_without_base_ref() {
        let payload = r#"{"type":"jobRequest","target":"feat-y","sourceRepo":"/repo"}"#;
        let event = decode_event("muster:events:job-request", payload).unwrap();
        assert_eq!(
            event,
            StoreEvent::JobRequest {
                target: "feat-y".to_string(),
                source_repo: "/repo".to_string(),
                base_ref: None,
            }
        );
    }

    #[test]
    fn garbage_payload_is_a_malformed_event_error() {
        let err = decode_event("muster:events:assistant", "not json").unwrap_err();
        assert_eq!(err.channel, "muster:events:assistant");
    }

    #[test]
    fn unknown_type_tag_is_rejected() {
        let payload = r#"{"type":"mystery","path":"/x"}"#;
        assert!(decode_event("muster:events:assistant", payload).is_err());
    }
}
