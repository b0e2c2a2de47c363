//! Withdrawal request model
//!
//! The authoritative record of one withdrawal. Each status is a variant of
//! [`RequestState`] carrying only the fields valid for it, so "agent id
//! present only sometimes" cannot happen by accident.
//!
//! # Lifecycle
//!
//! ```text
//! Pending ──match──▶ Matched ──arrived──▶ InProgress ──both confirmed──▶ Completed
//!    │                  │                     │
//!    ├──expiry──▶ Expired                     │
//!    └──────────────────┴──────cancel─────────┴──▶ Cancelled
//! ```
//!
//! # Critical Invariants
//!
//! 1. `Completed` carries both confirmation timestamps
//! 2. An agent id exists exactly in `Matched`, `InProgress` and `Completed`
//! 3. `amount` never changes after creation
//! 4. Terminal states (`Completed`, `Cancelled`, `Expired`) never change
//! 5. Every applied transition bumps `version` by one
//!
//! Transition methods check before they write: on `Err` the request is
//! untouched.

use crate::geo::Coordinate;
use crate::models::party::{Actor, MeetingType, Party};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Request status, without the per-status payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Matched,
    InProgress,
    Completed,
    Cancelled,
    Expired,
}

impl RequestStatus {
    /// No transition may leave a terminal status
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Cancelled | RequestStatus::Expired
        )
    }

    /// Statuses in which an agent is assigned and the parties track each other
    pub fn has_agent(self) -> bool {
        matches!(
            self,
            RequestStatus::Matched | RequestStatus::InProgress | RequestStatus::Completed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Matched => "matched",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
            RequestStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by request validation and transitions
///
/// Validation errors are raised before anything is stored. Conflict errors
/// mean the caller acted on an outdated view and should re-fetch.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RequestError {
    #[error("Amount {amount} is outside the allowed range {min}..={max}")]
    AmountOutOfRange { amount: i64, min: i64, max: i64 },

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid coordinate ({lat}, {lng})")]
    InvalidCoordinate { lat: f64, lng: f64 },

    #[error("A reason is required to cancel a request once an agent is assigned")]
    ReasonRequired,

    #[error("Cannot {action} a request that is {from}")]
    InvalidTransition {
        from: RequestStatus,
        action: &'static str,
    },

    #[error("Request is {0} and can no longer change")]
    TerminalState(RequestStatus),

    #[error("Both parties confirmed the handover; the request can no longer be cancelled")]
    CompletionInevitable,

    #[error("{0} is not a participant of this request")]
    NotParticipant(Actor),
}

impl RequestError {
    /// Rejected input, nothing was stored
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RequestError::AmountOutOfRange { .. }
                | RequestError::MissingField(_)
                | RequestError::InvalidCoordinate { .. }
                | RequestError::ReasonRequired
        )
    }

    /// The request moved on; re-fetch and reconcile
    pub fn is_conflict(&self) -> bool {
        !self.is_validation()
    }
}

/// The agent bound to a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub agent_id: String,
    pub accepted_at: DateTime<Utc>,
}

/// Independent handover confirmations of both parties
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Confirmations {
    pub agent_confirmed_at: Option<DateTime<Utc>>,
    pub user_confirmed_at: Option<DateTime<Utc>>,
}

impl Confirmations {
    pub fn agent_confirmed(&self) -> bool {
        self.agent_confirmed_at.is_some()
    }

    pub fn user_confirmed(&self) -> bool {
        self.user_confirmed_at.is_some()
    }

    /// Dual confirmation reached
    pub fn both(&self) -> bool {
        self.agent_confirmed() && self.user_confirmed()
    }

    pub fn is_confirmed_by(&self, party: Party) -> bool {
        match party {
            Party::Agent => self.agent_confirmed(),
            Party::Requester => self.user_confirmed(),
        }
    }

    /// Record a confirmation; a repeated one keeps the first timestamp
    ///
    /// Returns `true` if this call set the flag.
    fn record(&mut self, party: Party, at: DateTime<Utc>) -> bool {
        let slot = match party {
            Party::Agent => &mut self.agent_confirmed_at,
            Party::Requester => &mut self.user_confirmed_at,
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(at);
        true
    }
}

/// Cancellation metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cancellation {
    pub cancelled_by: Party,
    pub reason: Option<String>,
    pub cancelled_at: DateTime<Utc>,
    /// Agent that was assigned when the request was cancelled, if any
    pub released_agent_id: Option<String>,
}

/// Status together with the data that exists only in that status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestState {
    Pending {
        expires_at: Option<DateTime<Utc>>,
    },
    Matched {
        assignment: Assignment,
    },
    InProgress {
        assignment: Assignment,
        arrived_at: DateTime<Utc>,
        arrival_signaled_by: Party,
        confirmations: Confirmations,
    },
    Completed {
        assignment: Assignment,
        arrived_at: DateTime<Utc>,
        confirmations: Confirmations,
        completed_at: DateTime<Utc>,
    },
    Cancelled {
        cancellation: Cancellation,
    },
    Expired {
        expired_at: DateTime<Utc>,
    },
}

impl RequestState {
    pub fn status(&self) -> RequestStatus {
        match self {
            RequestState::Pending { .. } => RequestStatus::Pending,
            RequestState::Matched { .. } => RequestStatus::Matched,
            RequestState::InProgress { .. } => RequestStatus::InProgress,
            RequestState::Completed { .. } => RequestStatus::Completed,
            RequestState::Cancelled { .. } => RequestStatus::Cancelled,
            RequestState::Expired { .. } => RequestStatus::Expired,
        }
    }
}

/// Input for creating a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWithdrawal {
    pub requester_id: String,
    pub amount: i64,
    pub location: Coordinate,
    pub location_description: String,
    pub meeting_type: Option<MeetingType>,
    /// Agent picked by the requester at creation time, if any
    pub selected_agent_id: Option<String>,
}

/// Whether a transition call changed anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// State changed and `version` was bumped
    Applied,
    /// The call was a duplicate of an earlier one; nothing changed
    Unchanged,
}

/// Result of asking a request whether it can complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionCheck {
    /// Both confirmations present, completion may proceed
    Ready,
    /// Already completed earlier; duplicate attempts are successes
    AlreadyCompleted,
    /// At least one confirmation is missing
    AwaitingConfirmation,
}

/// A withdrawal request
///
/// # Example
/// ```
/// use cash_courier_core_rs::geo::Coordinate;
/// use cash_courier_core_rs::models::{Actor, NewWithdrawal, RequestStatus, WithdrawalRequest};
/// use chrono::Utc;
///
/// let now = Utc::now();
/// let mut request = WithdrawalRequest::create(
///     NewWithdrawal {
///         requester_id: "USER_1".to_string(),
///         amount: 2_000,
///         location: Coordinate::new(-1.2864, 36.8172),
///         location_description: "Main gate".to_string(),
///         meeting_type: None,
///         selected_agent_id: None,
///     },
///     (10, 100_000),
///     now,
///     None,
/// )
/// .unwrap();
///
/// request.match_agent(&Actor::agent("AGENT_A"), now).unwrap();
/// assert_eq!(request.status(), RequestStatus::Matched);
/// assert_eq!(request.agent_id(), Some("AGENT_A"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    id: String,
    requester_id: String,
    amount: i64,
    created_at: DateTime<Utc>,
    location: Coordinate,
    location_description: String,
    meeting_type: Option<MeetingType>,
    state: RequestState,
    /// Optimistic concurrency token, bumped by every applied transition
    version: u64,
    updated_at: DateTime<Utc>,
}

impl WithdrawalRequest {
    /// Validate input and build a new pending request
    ///
    /// # Arguments
    /// * `input` - Requester-supplied fields
    /// * `amount_bounds` - Inclusive `(min, max)` amount range
    /// * `now` - Creation time
    /// * `expires_at` - When the request expires if still unmatched
    pub fn create(
        input: NewWithdrawal,
        amount_bounds: (i64, i64),
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Self, RequestError> {
        let (min, max) = amount_bounds;
        if input.amount < min || input.amount > max {
            return Err(RequestError::AmountOutOfRange {
                amount: input.amount,
                min,
                max,
            });
        }
        if input.requester_id.trim().is_empty() {
            return Err(RequestError::MissingField("requester_id"));
        }
        if input.location_description.trim().is_empty() {
            return Err(RequestError::MissingField("location_description"));
        }
        if !input.location.is_valid() {
            return Err(RequestError::InvalidCoordinate {
                lat: input.location.lat,
                lng: input.location.lng,
            });
        }
        if let Some(agent_id) = &input.selected_agent_id {
            if agent_id.trim().is_empty() {
                return Err(RequestError::MissingField("selected_agent_id"));
            }
        }

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            requester_id: input.requester_id,
            amount: input.amount,
            created_at: now,
            location: input.location,
            location_description: input.location_description,
            meeting_type: input.meeting_type,
            state: RequestState::Pending { expires_at },
            version: 1,
            updated_at: now,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn requester_id(&self) -> &str {
        &self.requester_id
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn location(&self) -> Coordinate {
        self.location
    }

    pub fn location_description(&self) -> &str {
        &self.location_description
    }

    pub fn meeting_type(&self) -> Option<MeetingType> {
        self.meeting_type
    }

    pub fn state(&self) -> &RequestState {
        &self.state
    }

    pub fn status(&self) -> RequestStatus {
        self.state.status()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Current assignment, present only in Matched, InProgress and Completed
    pub fn assignment(&self) -> Option<&Assignment> {
        match &self.state {
            RequestState::Matched { assignment }
            | RequestState::InProgress { assignment, .. }
            | RequestState::Completed { assignment, .. } => Some(assignment),
            _ => None,
        }
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.assignment().map(|a| a.agent_id.as_str())
    }

    pub fn accepted_at(&self) -> Option<DateTime<Utc>> {
        self.assignment().map(|a| a.accepted_at)
    }

    /// Confirmation flags; all false before the parties have met
    pub fn confirmations(&self) -> Confirmations {
        match &self.state {
            RequestState::InProgress { confirmations, .. }
            | RequestState::Completed { confirmations, .. } => confirmations.clone(),
            _ => Confirmations::default(),
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            RequestState::Pending { expires_at } => expires_at,
            _ => None,
        }
    }

    pub fn cancellation(&self) -> Option<&Cancellation> {
        match &self.state {
            RequestState::Cancelled { cancellation } => Some(cancellation),
            _ => None,
        }
    }

    /// Pending and past its expiry timestamp
    pub fn is_due_for_expiry(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state, RequestState::Pending { expires_at: Some(at) } if at <= now)
    }

    /// Confirm `actor` belongs to this request
    ///
    /// The requester is matched by id; the agent must be the assigned one.
    pub fn ensure_participant(&self, actor: &Actor) -> Result<(), RequestError> {
        let is_participant = match actor.party {
            Party::Requester => actor.id == self.requester_id,
            Party::Agent => self.agent_id() == Some(actor.id.as_str()),
        };
        if is_participant {
            Ok(())
        } else {
            Err(RequestError::NotParticipant(actor.clone()))
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// `pending → matched`
    ///
    /// Triggered by an agent accepting the open request, or by the requester
    /// selecting that agent. Matching the same agent twice is a no-op.
    pub fn match_agent(
        &mut self,
        agent: &Actor,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RequestError> {
        if agent.party != Party::Agent || agent.id.trim().is_empty() {
            return Err(RequestError::MissingField("agent_id"));
        }
        match &self.state {
            RequestState::Pending { .. } => {
                self.apply(
                    RequestState::Matched {
                        assignment: Assignment {
                            agent_id: agent.id.clone(),
                            accepted_at: now,
                        },
                    },
                    now,
                );
                Ok(TransitionOutcome::Applied)
            }
            RequestState::Matched { assignment } if assignment.agent_id == agent.id => {
                Ok(TransitionOutcome::Unchanged)
            }
            state => Err(Self::reject(state.status(), "match")),
        }
    }

    /// `matched → in_progress`
    ///
    /// Either party may signal arrival. Repeating the signal is a no-op.
    pub fn mark_arrived(
        &mut self,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RequestError> {
        self.guard_not_terminal()?;
        self.ensure_participant(actor)?;
        match &self.state {
            RequestState::Matched { assignment } => {
                let assignment = assignment.clone();
                self.apply(
                    RequestState::InProgress {
                        assignment,
                        arrived_at: now,
                        arrival_signaled_by: actor.party,
                        confirmations: Confirmations::default(),
                    },
                    now,
                );
                Ok(TransitionOutcome::Applied)
            }
            RequestState::InProgress { .. } => Ok(TransitionOutcome::Unchanged),
            state => Err(Self::reject(state.status(), "mark arrival on")),
        }
    }

    /// Record a handover confirmation by `actor`
    ///
    /// Only valid in `in_progress`. Does not complete the request by itself;
    /// see [`WithdrawalRequest::completion_check`]. Repeating a confirmation
    /// on a completed request is `Unchanged`, so a retried completing
    /// confirmation reads as success.
    pub fn confirm(
        &mut self,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RequestError> {
        if let RequestState::Completed { confirmations, .. } = &self.state {
            self.ensure_participant(actor)?;
            if confirmations.is_confirmed_by(actor.party) {
                return Ok(TransitionOutcome::Unchanged);
            }
        }
        self.guard_not_terminal()?;
        self.ensure_participant(actor)?;
        let status = self.status();
        match &mut self.state {
            RequestState::InProgress { confirmations, .. } => {
                if confirmations.record(actor.party, now) {
                    self.version += 1;
                    self.updated_at = now;
                    Ok(TransitionOutcome::Applied)
                } else {
                    Ok(TransitionOutcome::Unchanged)
                }
            }
            _ => Err(Self::reject(status, "confirm")),
        }
    }

    /// Whether `in_progress → completed` may proceed
    pub fn completion_check(&self) -> Result<CompletionCheck, RequestError> {
        match &self.state {
            RequestState::InProgress { confirmations, .. } if confirmations.both() => {
                Ok(CompletionCheck::Ready)
            }
            RequestState::InProgress { .. } => Ok(CompletionCheck::AwaitingConfirmation),
            RequestState::Completed { .. } => Ok(CompletionCheck::AlreadyCompleted),
            RequestState::Pending { .. } | RequestState::Matched { .. } => {
                Ok(CompletionCheck::AwaitingConfirmation)
            }
            state => Err(RequestError::TerminalState(state.status())),
        }
    }

    /// `in_progress → completed`
    ///
    /// Callers must settle the ledger before persisting the result. A
    /// missing confirmation is not an error: the request is left untouched
    /// and `AwaitingConfirmation` is returned.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<CompletionCheck, RequestError> {
        let check = self.completion_check()?;
        if check != CompletionCheck::Ready {
            return Ok(check);
        }
        if let RequestState::InProgress {
            assignment,
            arrived_at,
            confirmations,
            ..
        } = &self.state
        {
            let completed = RequestState::Completed {
                assignment: assignment.clone(),
                arrived_at: *arrived_at,
                confirmations: confirmations.clone(),
                completed_at: now,
            };
            self.apply(completed, now);
        }
        Ok(CompletionCheck::Ready)
    }

    /// Any non-terminal state `→ cancelled`
    ///
    /// A requester cancelling after an agent was assigned must give a
    /// reason; agents may omit it. Refused once both parties confirmed.
    pub fn cancel(
        &mut self,
        actor: &Actor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RequestError> {
        self.guard_not_terminal()?;
        self.ensure_participant(actor)?;

        if self.confirmations().both() {
            return Err(RequestError::CompletionInevitable);
        }

        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        if actor.party == Party::Requester && self.agent_id().is_some() && reason.is_none() {
            return Err(RequestError::ReasonRequired);
        }

        let released_agent_id = self.agent_id().map(str::to_string);
        self.apply(
            RequestState::Cancelled {
                cancellation: Cancellation {
                    cancelled_by: actor.party,
                    reason,
                    cancelled_at: now,
                    released_agent_id,
                },
            },
            now,
        );
        Ok(TransitionOutcome::Applied)
    }

    /// `pending → expired` once the expiry timestamp has passed
    ///
    /// Returns `Unchanged` for a pending request that is not yet due.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<TransitionOutcome, RequestError> {
        match &self.state {
            RequestState::Pending { .. } if self.is_due_for_expiry(now) => {
                self.apply(RequestState::Expired { expired_at: now }, now);
                Ok(TransitionOutcome::Applied)
            }
            RequestState::Pending { .. } => Ok(TransitionOutcome::Unchanged),
            state => Err(Self::reject(state.status(), "expire")),
        }
    }

    /// Check the structural invariants of a stored record
    ///
    /// Used when restoring snapshots; records built through the transition
    /// methods always pass.
    pub fn validate_invariants(&self) -> Result<(), String> {
        if self.amount <= 0 {
            return Err(format!("request {} has non-positive amount", self.id));
        }
        if self.version == 0 {
            return Err(format!("request {} has version 0", self.id));
        }
        if self.status().has_agent() != self.agent_id().is_some() {
            return Err(format!(
                "request {} is {} but agent assignment is {:?}",
                self.id,
                self.status(),
                self.agent_id()
            ));
        }
        if let RequestState::Completed { confirmations, .. } = &self.state {
            if !confirmations.both() {
                return Err(format!(
                    "request {} is completed without both confirmations",
                    self.id
                ));
            }
        }
        Ok(())
    }

    fn apply(&mut self, state: RequestState, now: DateTime<Utc>) {
        self.state = state;
        self.version += 1;
        self.updated_at = now;
    }

    fn guard_not_terminal(&self) -> Result<(), RequestError> {
        let status = self.status();
        if status.is_terminal() {
            Err(RequestError::TerminalState(status))
        } else {
            Ok(())
        }
    }

    fn reject(from: RequestStatus, action: &'static str) -> RequestError {
        if from.is_terminal() {
            RequestError::TerminalState(from)
        } else {
            RequestError::InvalidTransition { from, action }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_request(now: DateTime<Utc>) -> WithdrawalRequest {
        WithdrawalRequest::create(
            NewWithdrawal {
                requester_id: "USER_1".to_string(),
                amount: 2_000,
                location: Coordinate::new(-1.2864, 36.8172),
                location_description: "Bus stop".to_string(),
                meeting_type: Some(MeetingType::AgentTravels),
                selected_agent_id: None,
            },
            (10, 100_000),
            now,
            Some(now + Duration::minutes(15)),
        )
        .unwrap()
    }

    fn in_progress(now: DateTime<Utc>) -> WithdrawalRequest {
        let mut request = new_request(now);
        request.match_agent(&Actor::agent("AGENT_A"), now).unwrap();
        request.mark_arrived(&Actor::agent("AGENT_A"), now).unwrap();
        request
    }

    #[test]
    fn test_new_request_is_pending_without_agent() {
        let now = Utc::now();
        let request = new_request(now);
        assert_eq!(request.status(), RequestStatus::Pending);
        assert_eq!(request.agent_id(), None);
        assert_eq!(request.version(), 1);
        assert!(request.validate_invariants().is_ok());
    }

    #[test]
    fn test_failed_transition_leaves_request_untouched() {
        let now = Utc::now();
        let mut request = new_request(now);
        let before = request.clone();

        let result = request.confirm(&Actor::requester("USER_1"), now);

        assert!(matches!(result, Err(RequestError::InvalidTransition { .. })));
        assert_eq!(request, before);
    }

    #[test]
    fn test_rematching_same_agent_is_unchanged() {
        let now = Utc::now();
        let mut request = new_request(now);
        request.match_agent(&Actor::agent("AGENT_A"), now).unwrap();
        let version = request.version();

        let outcome = request.match_agent(&Actor::agent("AGENT_A"), now).unwrap();
        assert_eq!(outcome, TransitionOutcome::Unchanged);
        assert_eq!(request.version(), version);

        let err = request.match_agent(&Actor::agent("AGENT_B"), now).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_confirm_is_idempotent_and_keeps_first_timestamp() {
        let now = Utc::now();
        let mut request = in_progress(now);
        request.confirm(&Actor::agent("AGENT_A"), now).unwrap();

        let later = now + Duration::seconds(30);
        let outcome = request.confirm(&Actor::agent("AGENT_A"), later).unwrap();

        assert_eq!(outcome, TransitionOutcome::Unchanged);
        assert_eq!(request.confirmations().agent_confirmed_at, Some(now));
    }

    #[test]
    fn test_stranger_cannot_confirm() {
        let now = Utc::now();
        let mut request = in_progress(now);
        let err = request.confirm(&Actor::agent("AGENT_Z"), now).unwrap_err();
        assert!(matches!(err, RequestError::NotParticipant(_)));
    }

    #[test]
    fn test_complete_defers_until_both_confirm() {
        let now = Utc::now();
        let mut request = in_progress(now);
        request.confirm(&Actor::requester("USER_1"), now).unwrap();

        assert_eq!(request.complete(now).unwrap(), CompletionCheck::AwaitingConfirmation);
        assert_eq!(request.status(), RequestStatus::InProgress);

        request.confirm(&Actor::agent("AGENT_A"), now).unwrap();
        assert_eq!(request.complete(now).unwrap(), CompletionCheck::Ready);
        assert_eq!(request.status(), RequestStatus::Completed);
        assert_eq!(request.complete(now).unwrap(), CompletionCheck::AlreadyCompleted);
        assert!(request.validate_invariants().is_ok());
    }

    #[test]
    fn test_repeated_confirmation_on_completed_request_is_unchanged() {
        let now = Utc::now();
        let mut request = in_progress(now);
        request.confirm(&Actor::agent("AGENT_A"), now).unwrap();
        request.confirm(&Actor::requester("USER_1"), now).unwrap();
        request.complete(now).unwrap();
        let completed = request.clone();

        let later = now + Duration::seconds(5);
        let outcome = request.confirm(&Actor::requester("USER_1"), later).unwrap();
        assert_eq!(outcome, TransitionOutcome::Unchanged);
        assert_eq!(request, completed);

        let err = request.confirm(&Actor::agent("AGENT_Z"), later).unwrap_err();
        assert!(matches!(err, RequestError::NotParticipant(_)));
    }

    #[test]
    fn test_cancel_rejected_once_both_confirmed() {
        let now = Utc::now();
        let mut request = in_progress(now);
        request.confirm(&Actor::requester("USER_1"), now).unwrap();
        request.confirm(&Actor::agent("AGENT_A"), now).unwrap();

        let err = request
            .cancel(&Actor::agent("AGENT_A"), Some("changed mind".to_string()), now)
            .unwrap_err();
        assert_eq!(err, RequestError::CompletionInevitable);
    }

    #[test]
    fn test_requester_needs_reason_after_match_but_agent_does_not() {
        let now = Utc::now();
        let mut request = new_request(now);
        request.match_agent(&Actor::agent("AGENT_A"), now).unwrap();

        let err = request
            .cancel(&Actor::requester("USER_1"), Some("   ".to_string()), now)
            .unwrap_err();
        assert_eq!(err, RequestError::ReasonRequired);

        request.cancel(&Actor::agent("AGENT_A"), None, now).unwrap();
        let cancellation = request.cancellation().unwrap();
        assert_eq!(cancellation.cancelled_by, Party::Agent);
        assert_eq!(cancellation.released_agent_id.as_deref(), Some("AGENT_A"));
        assert_eq!(request.agent_id(), None);
    }

    #[test]
    fn test_pending_cancel_without_reason_is_allowed() {
        let now = Utc::now();
        let mut request = new_request(now);
        request.cancel(&Actor::requester("USER_1"), None, now).unwrap();
        assert_eq!(request.status(), RequestStatus::Cancelled);
    }

    #[test]
    fn test_expire_only_when_due() {
        let now = Utc::now();
        let mut request = new_request(now);

        assert_eq!(request.expire(now).unwrap(), TransitionOutcome::Unchanged);
        assert_eq!(
            request.expire(now + Duration::minutes(15)).unwrap(),
            TransitionOutcome::Applied
        );
        assert_eq!(request.status(), RequestStatus::Expired);
    }

    #[test]
    fn test_state_serializes_with_status_tag() {
        let now = Utc::now();
        let request = in_progress(now);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["state"]["status"], "in_progress");
        assert_eq!(json["state"]["assignment"]["agent_id"], "AGENT_A");

        let restored: WithdrawalRequest = serde_json::from_value(json).unwrap();
        assert_eq!(restored, request);
    }
}
