//! Domain models for the withdrawal core

pub mod event;
pub mod party;
pub mod presence;
pub mod request;

// Re-exports
pub use event::{Event, EventLog};
pub use party::{Actor, MeetingType, Party};
pub use presence::{AgentPresence, RequesterPosition};
pub use request::{
    Assignment, Cancellation, CompletionCheck, Confirmations, NewWithdrawal, RequestError,
    RequestState, RequestStatus, TransitionOutcome, WithdrawalRequest,
};
