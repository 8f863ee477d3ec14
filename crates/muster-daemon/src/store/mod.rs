//! Coordination-store access.
//!
//! The daemon talks to the store exclusively through the [`CoordStore`]
//! trait so the engine can run against the in-memory implementation in
//! tests. The production implementation lives in [`redis_store`].

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::StoreError;

/// One message received on a subscribed channel.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub channel: String,
    pub payload: String,
}

/// Typed access to the shared key-value / pub-sub store.
///
/// Keys carry per-key expiry; `set_nx_ex` is the atomic conditional-set the
/// distributed locks are built on.
#[async_trait]
pub trait CoordStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set a key with a TTL.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;

    /// Atomic set-if-absent with TTL. Returns `true` when the key was set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64)
    -> Result<bool, StoreError>;

    /// Refresh a key's TTL without touching its value.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError>;

    async fn del(&self, key: &str) -> Result<(), StoreError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError>;

    /// Subscribe to a set of channels. Messages arrive on the returned
    /// receiver until the connection drops or the receiver is closed.
    async fn subscribe(
        &self,
        channels: &[String],
    ) -> Result<mpsc::Receiver<ChannelMessage>, StoreError>;
}
