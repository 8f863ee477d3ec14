//! Distributed locks over the coordination store.
//!
//! A lock is one key with a bounded TTL holding the requester's identity,
//! taken with an atomic set-if-absent. Holders renew the TTL while the
//! owning operation runs and delete the key on release; a crash costs at
//! most the remaining TTL. A waiter that can verify the holder's process is
//! dead reclaims the lock immediately instead of waiting it out.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::probes::pid_alive;
use crate::store::CoordStore;

/// Identity written into the lock key: `pid:<pid>@<host>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    pub pid: u32,
    pub host: String,
}

impl LockHolder {
    /// Identity for the current process.
    pub fn current() -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            pid: std::process::id(),
            host,
        }
    }

    pub fn encode(&self) -> String {
        format!("pid:{}@{}", self.pid, self.host)
    }

    pub fn decode(value: &str) -> Option<Self> {
        let rest = value.strip_prefix("pid:")?;
        let (pid, host) = rest.split_once('@')?;
        Some(Self {
            pid: pid.parse().ok()?,
            host: host.to_string(),
        })
    }

    /// True when the holder can be verified dead from this machine. A
    /// holder on another host or with an unparseable identity is treated as
    /// alive; only a same-host dead pid justifies reclaiming.
    fn verified_dead(&self, local_host: &str) -> bool {
        self.host == local_host && !pid_alive(self.pid)
    }
}

/// A held lock. Release is explicit on every exit path; the TTL is the
/// backstop, not the mechanism.
pub struct LockGuard {
    store: Arc<dyn CoordStore>,
    key: String,
    ttl_secs: u64,
}

impl LockGuard {
    /// Delete the lock key. Best-effort: a failure only means the key
    /// lingers until its TTL expires.
    pub async fn release(self) {
        if let Err(e) = self.store.del(&self.key).await {
            warn!("Failed to release lock {}: {e}", self.key);
        } else {
            debug!("Released lock {}", self.key);
        }
    }

    /// Spawn a task renewing the TTL at a third of its duration until
    /// cancelled.
    pub fn spawn_renewal(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        let ttl_secs = self.ttl_secs;
        let period = Duration::from_secs((ttl_secs / 3).max(1));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(period) => {
                        if let Err(e) = store.expire(&key, ttl_secs).await {
                            warn!("Failed to renew lock {key}: {e}");
                        }
                    }
                }
            }
        })
    }
}

/// One acquisition attempt, with stale-holder reclaim.
///
/// Returns `Ok(None)` when a live holder owns the lock. When the recorded
/// holder is verified dead, the stale key is deleted and the set retried
/// immediately.
pub async fn try_acquire(
    store: &Arc<dyn CoordStore>,
    key: &str,
    holder: &LockHolder,
    ttl_secs: u64,
) -> Result<Option<LockGuard>, StoreError> {
    let value = holder.encode();
    if store.set_nx_ex(key, &value, ttl_secs).await? {
        debug!("Acquired lock {key} as {value}");
        return Ok(Some(LockGuard {
            store: Arc::clone(store),
            key: key.to_string(),
            ttl_secs,
        }));
    }

    let current = store.get(key).await?;
    if let Some(current) = current
        && let Some(existing) = LockHolder::decode(&current)
        && existing.verified_dead(&holder.host)
    {
        info!(
            "Reclaiming lock {key} from dead holder pid {}",
            existing.pid
        );
        store.del(key).await?;
        if store.set_nx_ex(key, &value, ttl_secs).await? {
            return Ok(Some(LockGuard {
                store: Arc::clone(store),
                key: key.to_string(),
                ttl_secs,
            }));
        }
    }

    Ok(None)
}

/// Acquire with a bounded wait: retry on a fixed delay until `max_wait` is
/// spent. Used by the daemon singleton lock at startup.
pub async fn acquire(
    store: &Arc<dyn CoordStore>,
    key: &str,
    holder: &LockHolder,
    ttl_secs: u64,
    retry_delay: Duration,
    max_wait: Duration,
) -> Result<Option<LockGuard>, StoreError> {
    let deadline = tokio::time::Instant::now() + max_wait;
    loop {
        if let Some(guard) = try_acquire(store, key, holder, ttl_secs).await? {
            return Ok(Some(guard));
        }
        if tokio::time::Instant::now() + retry_delay > deadline {
            return Ok(None);
        }
        debug!("Lock {key} held; retrying in {retry_delay:?}");
        tokio::time::sleep(retry_delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn local_holder(pid: u32) -> LockHolder {
        LockHolder {
            pid,
            host: LockHolder::current().host,
        }
    }

    fn store() -> Arc<dyn CoordStore> {
        Arc::new(MemoryStore::new())
    }

    #[test]
    fn holder_identity_round_trips() {
        let holder = LockHolder {
            pid: 4242,
            host: "devbox".to_string(),
        };
        let decoded = LockHolder::decode(&holder.encode()).unwrap();
        assert_eq!(decoded, holder);
        assert!(LockHolder::decode("garbage").is_none());
    }

    #[tokio::test]
    async fn second_acquire_fails_while_held() {
        let store = store();
        let holder = local_holder(std::process::id());
        let guard = try_acquire(&store, "lk", &holder, 30).await.unwrap();
        assert!(guard.is_some());
        let second = try_acquire(&store, "lk", &holder, 30).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn release_frees_the_lock() {
        let store = store();
        let holder = local_holder(std::process::id());
        let guard = try_acquire(&store, "lk", &holder, 30)
            .await
            .unwrap()
            .unwrap();
        guard.release().await;
        assert!(try_acquire(&store, "lk", &holder, 30)
            .await
            .unwrap()
            .is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dead_holder_is_reclaimed() {
        let store = store();
        // Plant a lock held by a pid that cannot exist.
        let dead = local_holder(0x7FFF_FF00);
        store
            .set_nx_ex("lk", &dead.encode(), 300)
            .await
            .unwrap();

        let live = local_holder(std::process::id());
        let guard = try_acquire(&store, "lk", &live, 30).await.unwrap();
        assert!(guard.is_some());
        assert_eq!(
            store.get("lk").await.unwrap().as_deref(),
            Some(live.encode().as_str())
        );
    }

    #[tokio::test]
    async fn foreign_host_holder_is_not_reclaimed() {
        let store = store();
        let foreign = LockHolder {
            pid: 0x7FFF_FF00,
            host: "another-machine".to_string(),
        };
        store
            .set_nx_ex("lk", &foreign.encode(), 300)
            .await
            .unwrap();

        let live = local_holder(std::process::id());
        let guard = try_acquire(&store, "lk", &live, 30).await.unwrap();
        assert!(guard.is_none());
    }

    #[tokio::test]
    async fn renewal_keeps_lock_held_past_its_ttl() {
        let store = store();
        let holder = local_holder(std::process::id());
        // Two-second TTL, renewed every second by the background task.
        let guard = try_acquire(&store, "lk", &holder, 2)
            .await
            .unwrap()
            .unwrap();
        let cancel = CancellationToken::new();
        let renewal = guard.spawn_renewal(cancel.clone());

        // Well past the original expiry; a contender must still lose.
        tokio::time::sleep(Duration::from_secs(3)).await;
        let contender = try_acquire(&store, "lk", &holder, 2).await.unwrap();
        assert!(contender.is_none());

        cancel.cancel();
        renewal.abort();
        guard.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_wait_gives_up() {
        let store = store();
        let foreign = LockHolder {
            pid: 1,
            host: "another-machine".to_string(),
        };
        store
            .set_nx_ex("lk", &foreign.encode(), 600)
            .await
            .unwrap();

        let live = local_holder(std::process::id());
        let guard = acquire(
            &store,
            "lk",
            &live,
            30,
            Duration::from_secs(5),
            Duration::from_secs(20),
        )
        .await
        .unwrap();
        assert!(guard.is_none());
    }
}
