//! Crate-level error
//!
//! Every public service operation returns [`CoreError`]. [`CoreError::kind`]
//! groups errors by how a client should react, and
//! [`CoreError::user_message`] gives the text to show (or `None` when the
//! client should silently re-sync instead).

use crate::coordinator::checkpoint::CheckpointError;
use crate::core::config::ConfigError;
use crate::directory::DirectoryError;
use crate::ledger::LedgerError;
use crate::location::LocationError;
use crate::models::{RequestError, RequestStatus};
use crate::store::StoreError;
use crate::tracking::TrackingError;
use thiserror::Error;

/// How a client should react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input; nothing was changed. Show the message.
    Validation,
    /// The request moved on. Re-fetch and reconcile.
    Conflict,
    /// Device location failed
    Location,
    /// Ledger, routing or storage failed. Offer a retry.
    Collaborator,
    NotFound,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Location(#[from] LocationError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Tracking(#[from] TrackingError),

    #[error("Request {0} not found")]
    RequestNotFound(String),

    #[error("Agent {0} is not available")]
    AgentUnavailable(String),

    #[error("Agent {agent_id} is already serving request {request_id}")]
    AgentBusy { agent_id: String, request_id: String },

    #[error("Request is {0}; there is no counterpart to track")]
    NotTracking(RequestStatus),

    #[error("Request {request_id} kept changing; gave up after {attempts} attempts")]
    Contention { request_id: String, attempts: u32 },
}

impl CoreError {
    pub fn kind(&self) -> ErrorClass {
        match self {
            CoreError::Request(e) if e.is_validation() => ErrorClass::Validation,
            CoreError::Request(_) => ErrorClass::Conflict,
            CoreError::Store(StoreError::NotFound(_)) => ErrorClass::NotFound,
            CoreError::Store(StoreError::VersionMismatch { .. }) => ErrorClass::Conflict,
            CoreError::Store(_) => ErrorClass::Collaborator,
            CoreError::Ledger(_) => ErrorClass::Collaborator,
            CoreError::Location(_) => ErrorClass::Location,
            CoreError::Directory(DirectoryError::Store(_)) => ErrorClass::Collaborator,
            CoreError::Directory(DirectoryError::AccuracyTooLow { .. }) => ErrorClass::Location,
            CoreError::Directory(_) => ErrorClass::Validation,
            CoreError::Config(_) | CoreError::Checkpoint(_) | CoreError::Tracking(_) => {
                ErrorClass::Validation
            }
            CoreError::RequestNotFound(_) => ErrorClass::NotFound,
            CoreError::AgentUnavailable(_) | CoreError::AgentBusy { .. } => ErrorClass::Conflict,
            CoreError::NotTracking(_) | CoreError::Contention { .. } => ErrorClass::Conflict,
        }
    }

    /// Text for the user, `None` when the client should just re-sync
    pub fn user_message(&self) -> Option<String> {
        match self.kind() {
            ErrorClass::Validation => Some(self.to_string()),
            ErrorClass::Location => Some(match self {
                CoreError::Location(LocationError::PermissionDenied) => {
                    "Location access is required. Enable it in your settings.".to_string()
                }
                CoreError::Location(LocationError::NoSignal(_)) => {
                    "Could not get your location. Move to an open area and try again.".to_string()
                }
                other => other.to_string(),
            }),
            ErrorClass::Collaborator => {
                Some("Something went wrong on our side. Please try again.".to_string())
            }
            ErrorClass::NotFound => Some("This request no longer exists.".to_string()),
            ErrorClass::Conflict => None,
        }
    }
}
