//! Authoritative storage
//!
//! - [`RequestStore`]: withdrawal requests, mutated only through
//!   compare-and-swap on the record's `version`
//! - [`ExpiringStore`]: TTL-backed keyed values (agent presence, requester
//!   positions), shareable across service instances
//!
//! # Critical Invariants
//!
//! 1. **Linearized transitions**: a write succeeds only if the stored
//!    version equals the version the writer read
//! 2. **Immutable identity**: id, requester and amount never change on write
//! 3. **No cross-request ordering**: each record is independent

pub mod expiring;
#[cfg(feature = "redis-store")]
pub mod redis;

use crate::models::{RequestStatus, WithdrawalRequest};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

pub use expiring::{get_json, put_json, ExpiringStore, MemoryExpiringStore};
#[cfg(feature = "redis-store")]
pub use self::redis::RedisExpiringStore;

/// Errors raised by storage backends
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("Request {0} not found")]
    NotFound(String),

    #[error("Request {0} already exists")]
    Duplicate(String),

    #[error("Request {id} changed concurrently: expected version {expected}, found {actual}")]
    VersionMismatch { id: String, expected: u64, actual: u64 },

    #[error("Request {0}: immutable field changed")]
    ImmutableFieldChanged(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Serialization(error.to_string())
    }
}

/// Storage of withdrawal requests
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Store a freshly created request
    async fn insert(&self, request: WithdrawalRequest) -> Result<(), StoreError>;

    /// Fetch a request by id
    async fn get(&self, id: &str) -> Result<Option<WithdrawalRequest>, StoreError>;

    /// Replace the stored record if its version still equals `expected_version`
    async fn compare_and_swap(
        &self,
        expected_version: u64,
        updated: WithdrawalRequest,
    ) -> Result<(), StoreError>;

    /// All requests currently in `status`
    async fn list_by_status(
        &self,
        status: RequestStatus,
    ) -> Result<Vec<WithdrawalRequest>, StoreError>;

    /// Every stored request (checkpointing)
    async fn all(&self) -> Result<Vec<WithdrawalRequest>, StoreError>;

    /// Drop everything and load `requests` (checkpoint restore)
    async fn replace_all(&self, requests: Vec<WithdrawalRequest>) -> Result<(), StoreError>;
}

/// In-process request store
///
/// Suitable for a single instance and for tests. The write lock makes each
/// compare-and-swap atomic.
#[derive(Debug, Default)]
pub struct MemoryRequestStore {
    requests: RwLock<HashMap<String, WithdrawalRequest>>,
}

impl MemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.requests.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.requests.read().await.is_empty()
    }
}

#[async_trait]
impl RequestStore for MemoryRequestStore {
    async fn insert(&self, request: WithdrawalRequest) -> Result<(), StoreError> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(request.id()) {
            return Err(StoreError::Duplicate(request.id().to_string()));
        }
        requests.insert(request.id().to_string(), request);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<WithdrawalRequest>, StoreError> {
        Ok(self.requests.read().await.get(id).cloned())
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        updated: WithdrawalRequest,
    ) -> Result<(), StoreError> {
        let mut requests = self.requests.write().await;
        let current = requests
            .get(updated.id())
            .ok_or_else(|| StoreError::NotFound(updated.id().to_string()))?;

        if current.version() != expected_version {
            return Err(StoreError::VersionMismatch {
                id: updated.id().to_string(),
                expected: expected_version,
                actual: current.version(),
            });
        }
        if current.amount() != updated.amount() || current.requester_id() != updated.requester_id()
        {
            return Err(StoreError::ImmutableFieldChanged(updated.id().to_string()));
        }
        if updated.version() <= expected_version {
            // A write must carry a newer version or readers could not order it
            return Err(StoreError::VersionMismatch {
                id: updated.id().to_string(),
                expected: expected_version + 1,
                actual: updated.version(),
            });
        }

        requests.insert(updated.id().to_string(), updated);
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: RequestStatus,
    ) -> Result<Vec<WithdrawalRequest>, StoreError> {
        Ok(self
            .requests
            .read()
            .await
            .values()
            .filter(|r| r.status() == status)
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<WithdrawalRequest>, StoreError> {
        let mut all: Vec<WithdrawalRequest> = self.requests.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at().cmp(&b.created_at()).then_with(|| a.id().cmp(b.id())));
        Ok(all)
    }

    async fn replace_all(&self, requests: Vec<WithdrawalRequest>) -> Result<(), StoreError> {
        let mut map = HashMap::with_capacity(requests.len());
        for request in requests {
            let id = request.id().to_string();
            if map.insert(id.clone(), request).is_some() {
                return Err(StoreError::Duplicate(id));
            }
        }
        *self.requests.write().await = map;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinate;
    use crate::models::{Actor, NewWithdrawal};
    use chrono::Utc;

    fn request() -> WithdrawalRequest {
        WithdrawalRequest::create(
            NewWithdrawal {
                requester_id: "USER_1".to_string(),
                amount: 500,
                location: Coordinate::new(0.0, 0.0),
                location_description: "Corner shop".to_string(),
                meeting_type: None,
                selected_agent_id: None,
            },
            (10, 100_000),
            Utc::now(),
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_cas_rejects_stale_version() {
        let store = MemoryRequestStore::new();
        let original = request();
        store.insert(original.clone()).await.unwrap();

        let mut first = original.clone();
        first.match_agent(&Actor::agent("AGENT_A"), Utc::now()).unwrap();
        store.compare_and_swap(original.version(), first).await.unwrap();

        let mut second = original.clone();
        second.match_agent(&Actor::agent("AGENT_B"), Utc::now()).unwrap();
        let err = store
            .compare_and_swap(original.version(), second)
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::VersionMismatch { expected: 1, actual: 2, .. }));
        let stored = store.get(original.id()).await.unwrap().unwrap();
        assert_eq!(stored.agent_id(), Some("AGENT_A"));
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_id() {
        let store = MemoryRequestStore::new();
        let r = request();
        store.insert(r.clone()).await.unwrap();
        assert_eq!(
            store.insert(r.clone()).await.unwrap_err(),
            StoreError::Duplicate(r.id().to_string())
        );
    }

    #[tokio::test]
    async fn test_cas_requires_newer_version() {
        let store = MemoryRequestStore::new();
        let r = request();
        store.insert(r.clone()).await.unwrap();
        assert!(store.compare_and_swap(r.version(), r.clone()).await.is_err());
    }
}
