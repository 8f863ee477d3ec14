//! Snapshot publication.
//!
//! After each reconciliation pass the registry contents are written
//! back to the coordination store: one JSON record per instance, a
//! membership set, and a last-updated timestamp, followed by an
//! `instancesUpdated` broadcast. Writes are gated by a digest of the
//! externally visible fields so that an unchanged registry is not
//! re-serialized every cycle; a minimum write interval additionally
//! suppresses refreshes of identical snapshots, while any real change
//! goes out immediately regardless of the interval.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use muster_core::keys;
use muster_core::schema::{Instance, StoreEvent};

use crate::error::StoreError;
use crate::store::CoordStore;

pub struct SnapshotPublisher {
    min_interval: Duration,
    last_hash: Option<String>,
    last_write: Option<Instant>,
}

impl SnapshotPublisher {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_hash: None,
            last_write: None,
        }
    }

    /// Writes the registry to the store if anything observable changed
    /// or the refresh interval has elapsed. Returns whether a write
    /// happened.
    pub async fn publish(
        &mut self,
        store: &Arc<dyn CoordStore>,
        instances: &BTreeMap<String, Instance>,
    ) -> Result<bool, StoreError> {
        let hash = change_hash(instances);
        let unchanged = self.last_hash.as_deref() == Some(hash.as_str());
        let recent = self
            .last_write
            .is_some_and(|at| at.elapsed() < self.min_interval);
        if unchanged && recent {
            debug!(count = instances.len(), "snapshot unchanged, skipping write");
            return Ok(false);
        }

        let mut current = Vec::with_capacity(instances.len());
        for (path, instance) in instances {
            let payload = serde_json::to_string(instance)
                .map_err(|err| StoreError::operation(format!("encode instance: {err}")))?;
            store
                .set_ex(&keys::instance_key(path), &payload, keys::INSTANCE_TTL_SECS)
                .await?;
            current.push(path.clone());
        }

        // Reconcile the membership set against what we just wrote.
        let previous = store.smembers(keys::INSTANCES_SET).await?;
        for path in &previous {
            if !instances.contains_key(path) {
                store.srem(keys::INSTANCES_SET, path).await?;
                store.del(&keys::instance_key(path)).await?;
            }
        }
        for path in &current {
            store.sadd(keys::INSTANCES_SET, path).await?;
        }

        store
            .set_ex(
                keys::UPDATED_AT,
                &Utc::now().to_rfc3339(),
                keys::INSTANCE_TTL_SECS,
            )
            .await?;

        let event = StoreEvent::InstancesUpdated {
            count: instances.len(),
        };
        let payload = serde_json::to_string(&event)
            .map_err(|err| StoreError::operation(format!("encode event: {err}")))?;
        store
            .publish(keys::channels::INSTANCES_UPDATED, &payload)
            .await?;

        info!(count = instances.len(), "published instance snapshot");
        self.last_hash = Some(hash);
        self.last_write = Some(Instant::now());
        Ok(true)
    }
}

/// Digest of the fields a consumer can observe changing. Volatile
/// bookkeeping such as `lastUpdated` is deliberately excluded so a
/// no-op cycle does not look like a change.
fn change_hash(instances: &BTreeMap<String, Instance>) -> String {
    let mut hasher = Sha256::new();
    for (path, instance) in instances {
        hasher.update(path.as_bytes());
        hasher.update([0]);
        hasher.update(instance.name.as_bytes());
        hasher.update([0]);
        if let Some(git) = &instance.git_info {
            hasher.update(git.branch.as_bytes());
            hasher.update([u8::from(git.dirty)]);
        }
        hasher.update([0]);
        if let Some(review) = &instance.review_status {
            hasher.update(review.number.to_le_bytes());
            hasher.update(format!("{:?}", review.state).as_bytes());
            hasher.update(format!("{:?}", review.conclusion()).as_bytes());
        }
        hasher.update([0]);
        if let Some(assistant) = &instance.assistant_status {
            hasher.update([u8::from(assistant.any_active())]);
            if let Some(primary) = assistant.primary() {
                hasher.update(format!("{:?}", primary.status).as_bytes());
            }
        }
        hasher.update([0]);
        if let Some(mux) = &instance.multiplexer_status {
            hasher.update([u8::from(mux.exists)]);
        }
        if let Some(host) = &instance.proxy_host {
            hasher.update(host.as_bytes());
        }
        hasher.update([0xff]);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use muster_core::schema::SessionStatus;

    fn registry_with(paths: &[&str]) -> BTreeMap<String, Instance> {
        paths
            .iter()
            .map(|p| ((*p).to_string(), Instance::discovered(p, Utc::now())))
            .collect()
    }

    #[tokio::test]
    async fn first_publish_writes_everything() {
        let store: Arc<dyn CoordStore> = Arc::new(MemoryStore::new());
        let mut publisher = SnapshotPublisher::new(Duration::from_secs(30));
        let instances = registry_with(&["/w/alpha", "/w/beta"]);

        assert!(publisher.publish(&store, &instances).await.unwrap());

        let members = store.smembers(keys::INSTANCES_SET).await.unwrap();
        assert_eq!(members.len(), 2);
        assert!(store
            .get(&keys::instance_key("/w/alpha"))
            .await
            .unwrap()
            .is_some());
        assert!(store.get(keys::UPDATED_AT).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unchanged_snapshot_is_debounced() {
        let store: Arc<dyn CoordStore> = Arc::new(MemoryStore::new());
        let mut publisher = SnapshotPublisher::new(Duration::from_secs(30));
        let instances = registry_with(&["/w/alpha"]);

        assert!(publisher.publish(&store, &instances).await.unwrap());
        assert!(!publisher.publish(&store, &instances).await.unwrap());
    }

    #[tokio::test]
    async fn changed_snapshot_bypasses_interval() {
        let store: Arc<dyn CoordStore> = Arc::new(MemoryStore::new());
        let mut publisher = SnapshotPublisher::new(Duration::from_secs(3600));
        let mut instances = registry_with(&["/w/alpha"]);
        assert!(publisher.publish(&store, &instances).await.unwrap());

        let status = instances
            .get_mut("/w/alpha")
            .unwrap()
            .assistant_status
            .get_or_insert_with(Default::default);
        let session =
            muster_core::schema::AssistantSession::new(42, SessionStatus::Working, Utc::now());
        status.sessions.insert(42, session);
        status.primary_session = Some(42);

        assert!(publisher.publish(&store, &instances).await.unwrap());
    }

    #[tokio::test]
    async fn removed_instance_is_cleaned_up() {
        let store: Arc<dyn CoordStore> = Arc::new(MemoryStore::new());
        let mut publisher = SnapshotPublisher::new(Duration::from_secs(0));
        let both = registry_with(&["/w/alpha", "/w/beta"]);
        publisher.publish(&store, &both).await.unwrap();

        let one = registry_with(&["/w/alpha"]);
        assert!(publisher.publish(&store, &one).await.unwrap());

        let members = store.smembers(keys::INSTANCES_SET).await.unwrap();
        assert_eq!(members, vec!["/w/alpha".to_string()]);
        assert!(store
            .get(&keys::instance_key("/w/beta"))
            .await
            .unwrap()
            .is_none());
    }
}
