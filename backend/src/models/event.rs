//! Event log for auditing request lifecycles
//!
//! Every applied transition and every ledger outcome is recorded as an
//! [`Event`]. The log answers "what happened to request X and when",
//! which is what support staff need when a handover is disputed.
//!
//! # Example
//!
//! ```rust
//! use cash_courier_core_rs::models::{Event, EventLog, Party};
//! use chrono::Utc;
//!
//! let mut log = EventLog::new();
//! log.log(Event::Confirmed {
//!     at: Utc::now(),
//!     request_id: "req-1".to_string(),
//!     party: Party::Agent,
//! });
//! assert_eq!(log.events_for_request("req-1").len(), 1);
//! ```

use crate::models::party::Party;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A state change worth keeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RequestCreated {
        at: DateTime<Utc>,
        request_id: String,
        requester_id: String,
        amount: i64,
    },

    AgentMatched {
        at: DateTime<Utc>,
        request_id: String,
        agent_id: String,
        /// Who initiated the match: the requester selecting, or the agent accepting
        initiated_by: Party,
    },

    ArrivalSignaled {
        at: DateTime<Utc>,
        request_id: String,
        party: Party,
    },

    Confirmed {
        at: DateTime<Utc>,
        request_id: String,
        party: Party,
    },

    /// Ledger debit and credit both applied
    LedgerSettled {
        at: DateTime<Utc>,
        request_id: String,
        debited: i64,
        credited: i64,
    },

    /// Ledger refused or failed; the request stays in progress
    CompletionFailed {
        at: DateTime<Utc>,
        request_id: String,
        reason: String,
    },

    Completed {
        at: DateTime<Utc>,
        request_id: String,
    },

    Cancelled {
        at: DateTime<Utc>,
        request_id: String,
        party: Party,
        reason: Option<String>,
    },

    Expired {
        at: DateTime<Utc>,
        request_id: String,
    },
}

impl Event {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Event::RequestCreated { at, .. }
            | Event::AgentMatched { at, .. }
            | Event::ArrivalSignaled { at, .. }
            | Event::Confirmed { at, .. }
            | Event::LedgerSettled { at, .. }
            | Event::CompletionFailed { at, .. }
            | Event::Completed { at, .. }
            | Event::Cancelled { at, .. }
            | Event::Expired { at, .. } => *at,
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            Event::RequestCreated { request_id, .. }
            | Event::AgentMatched { request_id, .. }
            | Event::ArrivalSignaled { request_id, .. }
            | Event::Confirmed { request_id, .. }
            | Event::LedgerSettled { request_id, .. }
            | Event::CompletionFailed { request_id, .. }
            | Event::Completed { request_id, .. }
            | Event::Cancelled { request_id, .. }
            | Event::Expired { request_id, .. } => request_id,
        }
    }

    /// Short type name used in logs
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::RequestCreated { .. } => "request_created",
            Event::AgentMatched { .. } => "agent_matched",
            Event::ArrivalSignaled { .. } => "arrival_signaled",
            Event::Confirmed { .. } => "confirmed",
            Event::LedgerSettled { .. } => "ledger_settled",
            Event::CompletionFailed { .. } => "completion_failed",
            Event::Completed { .. } => "completed",
            Event::Cancelled { .. } => "cancelled",
            Event::Expired { .. } => "expired",
        }
    }
}

/// Append-only event log
///
/// With a retention bound the oldest events are evicted first, so a
/// long-running service keeps at most that many. [`EventLog::drain`] hands
/// everything over to an external sink and empties the log.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: VecDeque<Event>,
    retention: Option<usize>,
    evicted: u64,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retention` events (at least one)
    pub fn with_retention(retention: usize) -> Self {
        Self {
            retention: Some(retention.max(1)),
            ..Self::default()
        }
    }

    pub fn log(&mut self, event: Event) {
        if let Some(retention) = self.retention {
            while self.events.len() >= retention {
                self.events.pop_front();
                self.evicted += 1;
            }
        }
        self.events.push_back(event);
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> + '_ {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events dropped by the retention bound so far
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Take every retained event, oldest first
    pub fn drain(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    /// Events of one request, in the order they happened
    pub fn events_for_request(&self, request_id: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.request_id() == request_id)
            .collect()
    }

    /// Events of one type across all requests
    pub fn events_of_type(&self, event_type: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_by_request_and_type() {
        let now = Utc::now();
        let mut log = EventLog::new();
        log.log(Event::Completed {
            at: now,
            request_id: "a".to_string(),
        });
        log.log(Event::Expired {
            at: now,
            request_id: "b".to_string(),
        });
        log.log(Event::Confirmed {
            at: now,
            request_id: "a".to_string(),
            party: Party::Requester,
        });

        assert_eq!(log.events_for_request("a").len(), 2);
        assert_eq!(log.events_of_type("expired").len(), 1);
        assert_eq!(log.events_of_type("expired")[0].request_id(), "b");
    }

    #[test]
    fn test_retention_evicts_oldest_first() {
        let now = Utc::now();
        let mut log = EventLog::with_retention(3);
        for i in 0..5 {
            log.log(Event::Expired {
                at: now,
                request_id: format!("req-{}", i),
            });
        }

        assert_eq!(log.len(), 3);
        assert_eq!(log.evicted(), 2);
        let kept: Vec<&str> = log.events().map(|e| e.request_id()).collect();
        assert_eq!(kept, vec!["req-2", "req-3", "req-4"]);

        let drained = log.drain();
        assert_eq!(drained.len(), 3);
        assert!(log.is_empty());
        assert_eq!(log.evicted(), 2);
    }
}
