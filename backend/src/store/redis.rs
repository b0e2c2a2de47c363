//! Redis-backed [`ExpiringStore`]
//!
//! Keys are namespaced (`{namespace}:{key}`) and written with `SET .. PX`
//! so Redis enforces the TTL. Enabled by the `redis-store` feature.

use super::expiring::ExpiringStore;
use super::StoreError;
use async_trait::async_trait;
use std::time::Duration;

impl From<::redis::RedisError> for StoreError {
    fn from(error: ::redis::RedisError) -> Self {
        StoreError::Backend(error.to_string())
    }
}

/// Shared TTL store on a Redis server
pub struct RedisExpiringStore {
    client: ::redis::Client,
    namespace: String,
}

impl RedisExpiringStore {
    /// Connect lazily to `url` (e.g. `redis://127.0.0.1/`)
    pub fn open(url: &str, namespace: impl Into<String>) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(url)?;
        Ok(Self {
            client,
            namespace: namespace.into(),
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    async fn connection(&self) -> Result<::redis::aio::Connection, StoreError> {
        Ok(self.client.get_async_connection().await?)
    }
}

#[async_trait]
impl ExpiringStore for RedisExpiringStore {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let ttl_ms = ttl.as_millis().max(1) as u64;
        ::redis::cmd("SET")
            .arg(self.namespaced(key))
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = ::redis::cmd("GET")
            .arg(self.namespaced(key))
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        ::redis::cmd("DEL")
            .arg(self.namespaced(key))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", self.namespaced(prefix));

        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = ::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        if keys.is_empty() {
            return Ok(Vec::new());
        }
        keys.sort();
        keys.dedup();

        // Keys may expire between SCAN and MGET; those come back as nil
        let values: Vec<Option<String>> = ::redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        let strip = format!("{}:", self.namespace);
        Ok(keys
            .into_iter()
            .zip(values)
            .filter_map(|(key, value)| {
                let value = value?;
                let key = key.strip_prefix(&strip).unwrap_or(&key).to_string();
                Some((key, value))
            })
            .collect())
    }
}
