//! Checkpoint - save/restore of the request store
//!
//! # Critical Invariants
//!
//! - **Config matching**: a snapshot only restores under the config whose
//!   fingerprint it carries
//! - **Record integrity**: every request passes its structural invariants
//! - **Uniqueness**: no request id appears twice

use crate::models::WithdrawalRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CheckpointError {
    #[error("Snapshot was taken under config {snapshot}, current config is {current}")]
    ConfigMismatch { snapshot: String, current: String },

    #[error("Duplicate request {0} in snapshot")]
    DuplicateRequest(String),

    #[error("Invalid request record: {0}")]
    InvalidRecord(String),

    #[error("Snapshot serialization failed: {0}")]
    Serialization(String),
}

// ============================================================================
// Snapshot Structures
// ============================================================================

/// All requests at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub taken_at: DateTime<Utc>,

    /// SHA256 of the config in force when the snapshot was taken
    pub config_hash: String,

    pub requests: Vec<WithdrawalRequest>,
}

impl StoreSnapshot {
    pub fn to_json(&self) -> Result<String, CheckpointError> {
        serde_json::to_string_pretty(self).map_err(|e| CheckpointError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, CheckpointError> {
        serde_json::from_str(json).map_err(|e| CheckpointError::Serialization(e.to_string()))
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Check a snapshot before it replaces the store
pub fn validate_snapshot(
    snapshot: &StoreSnapshot,
    current_config_hash: &str,
) -> Result<(), CheckpointError> {
    if snapshot.config_hash != current_config_hash {
        return Err(CheckpointError::ConfigMismatch {
            snapshot: snapshot.config_hash.clone(),
            current: current_config_hash.to_string(),
        });
    }

    let mut seen = HashSet::with_capacity(snapshot.requests.len());
    for request in &snapshot.requests {
        if !seen.insert(request.id()) {
            return Err(CheckpointError::DuplicateRequest(request.id().to_string()));
        }
        request
            .validate_invariants()
            .map_err(CheckpointError::InvalidRecord)?;
    }

    Ok(())
}
