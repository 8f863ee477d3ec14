//! Inbound event dispatch.
//!
//! One function per subscription cycle: decode the payload at the
//! boundary, then route it. Assistant lifecycle events flow into the
//! session tracker and trigger an immediate snapshot publish; refresh
//! requests bubble up so the caller runs a forced reconciliation pass;
//! job requests are handed to the orchestrator on their own task so a
//! long-running worktree creation never stalls the event loop.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use muster_core::keys;
use muster_core::schema::{decode_event, ExtensionState, StoreEvent, TerminalIdentity};

use crate::assistant::LifecycleKind;
use crate::registry::Engine;
use crate::store::ChannelMessage;
use crate::worktree::{JobOrchestrator, WorktreeRequest};

/// What the event loop should do after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    None,
    /// Run a forced reconciliation pass now.
    ForceCycle,
}

pub async fn dispatch(
    engine: &mut Engine,
    orchestrator: &Arc<JobOrchestrator>,
    message: ChannelMessage,
) -> Dispatch {
    let event = match decode_event(&message.channel, &message.payload) {
        Ok(event) => event,
        Err(err) => {
            // Malformed traffic is logged and dropped; one bad producer
            // must not take the loop down.
            warn!(error = %err, "dropping malformed event");
            return Dispatch::None;
        }
    };

    match event {
        StoreEvent::AssistantStarted {
            path,
            pid,
            terminal,
        } => {
            apply_lifecycle(engine, LifecycleKind::Started, path, pid, terminal).await;
            Dispatch::None
        }
        StoreEvent::AssistantWaiting {
            path,
            pid,
            terminal,
        } => {
            apply_lifecycle(engine, LifecycleKind::Waiting, path, pid, terminal).await;
            Dispatch::None
        }
        StoreEvent::AssistantCompacting {
            path,
            pid,
            terminal,
        } => {
            apply_lifecycle(engine, LifecycleKind::Compacting, path, pid, terminal).await;
            Dispatch::None
        }
        StoreEvent::AssistantStopped {
            path,
            pid,
            terminal,
        } => {
            apply_lifecycle(engine, LifecycleKind::Stopped, path, pid, terminal).await;
            Dispatch::None
        }
        StoreEvent::Heartbeat {
            path,
            version,
            active_file,
            branch,
        } => {
            handle_heartbeat(engine, path, version, active_file, branch).await;
            Dispatch::None
        }
        StoreEvent::Refresh { path } => {
            debug!(path = ?path, "refresh requested");
            Dispatch::ForceCycle
        }
        StoreEvent::JobRequest {
            target,
            source_repo,
            base_ref,
        } => {
            let request = WorktreeRequest {
                target,
                source_repo,
                base_ref,
            };
            let orchestrator = Arc::clone(orchestrator);
            tokio::spawn(async move {
                orchestrator.handle_request(request).await;
            });
            Dispatch::None
        }
        // Outbound-only traffic; nothing to do if it loops back.
        StoreEvent::JobProgress { .. }
        | StoreEvent::JobStatusChanged { .. }
        | StoreEvent::InstancesUpdated { .. }
        | StoreEvent::Notification { .. } => Dispatch::None,
    }
}

async fn apply_lifecycle(
    engine: &mut Engine,
    kind: LifecycleKind,
    path: String,
    pid: Option<u32>,
    terminal: Option<TerminalIdentity>,
) {
    let terminal = match terminal {
        Some(terminal) => Some(terminal),
        None => lookup_terminal(engine, pid).await,
    };
    engine
        .tracker
        .apply_event(&path, kind, pid, terminal, Utc::now());
    engine.refresh_assistant_projection(&path);
    engine.publish_now().await;
}

/// Hook emitters that cannot introspect their own terminal register it
/// in a keyed side channel; fall back to that when the event carries
/// no identity.
async fn lookup_terminal(engine: &Engine, pid: Option<u32>) -> Option<TerminalIdentity> {
    let pid = pid?;
    match engine.store().get(&keys::terminal_context_key(pid)).await {
        Ok(Some(payload)) => match serde_json::from_str(&payload) {
            Ok(terminal) => Some(terminal),
            Err(err) => {
                debug!(pid, error = %err, "unreadable terminal context entry");
                None
            }
        },
        Ok(None) => None,
        Err(err) => {
            debug!(pid, error = %err, "terminal context lookup failed");
            None
        }
    }
}

async fn handle_heartbeat(
    engine: &mut Engine,
    path: String,
    version: Option<String>,
    active_file: Option<String>,
    branch: Option<String>,
) {
    // Heartbeats are how editors enroll workspaces for discovery.
    if let Err(err) = engine
        .store()
        .sadd(keys::WORKSPACES_SET, &path)
        .await
    {
        warn!(path = %path, error = %err, "failed to record heartbeat workspace");
    }

    if let Some(instance) = engine.registry.get_mut(&path) {
        instance.extension_state = Some(ExtensionState {
            version,
            active_file,
            last_heartbeat: Utc::now(),
        });
        // The editor sees branch switches before the next git probe does.
        if let Some(branch) = branch
            && let Some(git) = instance.git_info.as_mut()
            && git.branch != branch
        {
            git.branch = branch;
        }
        engine.publish_now().await;
    }
}
