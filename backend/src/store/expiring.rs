//! TTL-backed keyed store
//!
//! Short-lived shared state (agent presence, requester live positions) must
//! survive multi-instance deployment, so it sits behind [`ExpiringStore`]
//! rather than a process-wide map. [`MemoryExpiringStore`] serves tests and
//! single-instance runs; the `redis-store` feature adds a Redis backend.

use super::StoreError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Keyed string values that vanish after their TTL
#[async_trait]
pub trait ExpiringStore: Send + Sync {
    /// Insert or overwrite `key` (last write wins), expiring after `ttl`
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    /// Value of `key` unless missing or expired
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// All live `(key, value)` pairs whose key starts with `prefix`
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError>;
}

/// Serialize `value` as JSON and store it
pub async fn put_json<T: Serialize + Sync>(
    store: &dyn ExpiringStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), StoreError> {
    let json = serde_json::to_string(value)?;
    store.put(key, json, ttl).await
}

/// Load and deserialize a JSON value
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn ExpiringStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process [`ExpiringStore`]
///
/// Uses tokio's clock, so paused-time tests can fast-forward expiry.
/// Expired entries are dropped lazily on access.
#[derive(Debug, Default)]
pub struct MemoryExpiringStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryExpiringStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired entry, returning how many were dropped
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }
}

#[async_trait]
impl ExpiringStore for MemoryExpiringStore {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone()))
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        self.purge_expired().await;
        let entries = self.entries.read().await;
        let mut found: Vec<(String, String)> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }
}
