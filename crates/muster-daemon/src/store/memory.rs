//! In-memory store used by tests.
//!
//! Implements the same semantics as the Redis store (per-key expiry,
//! conditional set, channel broadcast) over process-local state. Expiry is
//! evaluated lazily on access.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use super::{ChannelMessage, CoordStore};
use crate::error::StoreError;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.is_none_or(|at| at > Instant::now())
    }
}

/// Process-local [`CoordStore`].
pub struct MemoryStore {
    strings: Mutex<HashMap<String, Entry>>,
    sets: Mutex<HashMap<String, HashSet<String>>>,
    bus: broadcast::Sender<ChannelMessage>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(256);
        Self {
            strings: Mutex::new(HashMap::new()),
            sets: Mutex::new(HashMap::new()),
            bus,
        }
    }

    /// Test helper: number of published messages a later subscriber missed
    /// is not tracked; use this to subscribe to everything.
    pub fn subscribe_all(&self) -> broadcast::Receiver<ChannelMessage> {
        self.bus.subscribe()
    }

    fn expiry(ttl_secs: u64) -> Option<Instant> {
        Some(Instant::now() + Duration::from_secs(ttl_secs))
    }
}

#[async_trait]
impl CoordStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut strings = self.strings.lock().unwrap();
        match strings.get(key) {
            Some(entry) if entry.live() => Ok(Some(entry.value.clone())),
            Some(_) => {
                strings.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        self.strings.lock().unwrap().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Self::expiry(ttl_secs),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<bool, StoreError> {
        let mut strings = self.strings.lock().unwrap();
        if strings.get(key).is_some_and(Entry::live) {
            return Ok(false);
        }
        strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Self::expiry(ttl_secs),
            },
        );
        Ok(true)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError> {
        if let Some(entry) = self.strings.lock().unwrap().get_mut(key) {
            entry.expires_at = Self::expiry(ttl_secs);
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.strings.lock().unwrap().remove(key);
        self.sets.lock().unwrap().remove(key);
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.sets
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        if let Some(set) = self.sets.lock().unwrap().get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .sets
            .lock()
            .unwrap()
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        // No subscribers is fine; publish is fire-and-forget.
        let _ = self.bus.send(ChannelMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        channels: &[String],
    ) -> Result<mpsc::Receiver<ChannelMessage>, StoreError> {
        let wanted: HashSet<String> = channels.iter().cloned().collect();
        let mut bus_rx = self.bus.subscribe();
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            while let Ok(msg) = bus_rx.recv().await {
                if !wanted.contains(&msg.channel) {
                    continue;
                }
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_is_exclusive_until_deleted() {
        let store = MemoryStore::new();
        assert!(store.set_nx_ex("lock", "a", 30).await.unwrap());
        assert!(!store.set_nx_ex("lock", "b", 30).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("a"));

        store.del("lock").await.unwrap();
        assert!(store.set_nx_ex("lock", "b", 30).await.unwrap());
    }

    #[tokio::test]
    async fn set_membership() {
        let store = MemoryStore::new();
        store.sadd("s", "/a").await.unwrap();
        store.sadd("s", "/b").await.unwrap();
        store.srem("s", "/a").await.unwrap();
        assert_eq!(store.smembers("s").await.unwrap(), vec!["/b".to_string()]);
    }

    #[tokio::test]
    async fn subscribe_filters_by_channel() {
        let store = MemoryStore::new();
        let mut rx = store
            .subscribe(&["chan-a".to_string()])
            .await
            .unwrap();
        store.publish("chan-b", "ignored").await.unwrap();
        store.publish("chan-a", "seen").await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.channel, "chan-a");
        assert_eq!(msg.payload, "seen");
    }
}
