//! Workspace discovery.
//!
//! The authoritative list of candidate workspaces lives in the
//! coordination store as a set of absolute paths. Editors and other
//! publishers add themselves via heartbeats; an optional enumeration
//! command can seed the set from outside (e.g. a window-listing
//! script). Discovery reads the set back and drops entries whose
//! directory no longer exists, pruning them from the set as it goes.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use muster_core::keys;

use crate::error::{ProbeError, StoreError};
use crate::probes::dir_exists;
use crate::store::CoordStore;

#[async_trait]
pub trait Discovery: Send + Sync {
    /// Returns the current set of live workspace paths.
    async fn discover(&self) -> Result<Vec<PathBuf>, StoreError>;
}

/// Store-backed discovery over the shared workspace set.
pub struct WorkspaceDiscovery {
    store: Arc<dyn CoordStore>,
}

impl WorkspaceDiscovery {
    pub fn new(store: Arc<dyn CoordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Discovery for WorkspaceDiscovery {
    async fn discover(&self) -> Result<Vec<PathBuf>, StoreError> {
        let members = self.store.smembers(keys::WORKSPACES_SET).await?;
        let mut live = Vec::with_capacity(members.len());
        for member in members {
            let path = PathBuf::from(&member);
            if dir_exists(&path) {
                live.push(path);
            } else {
                debug!(path = %member, "pruning vanished workspace");
                self.store.srem(keys::WORKSPACES_SET, &member).await?;
            }
        }
        live.sort();
        Ok(live)
    }
}

/// Runs the configured enumeration command and returns one path per
/// non-empty line of its stdout. A failing or missing command yields
/// an error; callers treat that as "no external candidates this pass".
pub async fn enumerate_external(command: &str) -> Result<Vec<PathBuf>, ProbeError> {
    let command = command.to_string();
    let shown = command.clone();
    let output = tokio::task::spawn_blocking(move || {
        std::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .output()
    })
    .await
    .map_err(|err| ProbeError::command_with(&shown, err))?
    .map_err(|err| ProbeError::command_with(&shown, err))?;

    if !output.status.success() {
        warn!(command = %shown, status = %output.status, "enumeration command failed");
        return Err(ProbeError::command(format!(
            "enumeration command exited with {}",
            output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn discover_filters_missing_directories() {
        let store: Arc<dyn CoordStore> = Arc::new(MemoryStore::new());
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().to_string_lossy().to_string();

        store.sadd(keys::WORKSPACES_SET, &live).await.unwrap();
        store
            .sadd(keys::WORKSPACES_SET, "/nonexistent/muster-test-path")
            .await
            .unwrap();

        let discovery = WorkspaceDiscovery::new(Arc::clone(&store));
        let found = discovery.discover().await.unwrap();
        assert_eq!(found, vec![PathBuf::from(&live)]);

        // The dead entry is pruned from the set, not merely skipped.
        let members = store.smembers(keys::WORKSPACES_SET).await.unwrap();
        assert_eq!(members, vec![live]);
    }

    #[tokio::test]
    async fn enumerate_splits_lines_and_trims() {
        let paths = enumerate_external("printf '/a/b\\n\\n  /c/d  \\n'")
            .await
            .unwrap();
        assert_eq!(paths, vec![PathBuf::from("/a/b"), PathBuf::from("/c/d")]);
    }

    #[tokio::test]
    async fn enumerate_surfaces_command_failure() {
        assert!(enumerate_external("exit 3").await.is_err());
    }
}
