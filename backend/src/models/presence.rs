//! Agent presence
//!
//! A live, last-write-wins record of where an agent is and whether it is
//! taking requests. Only the owning agent writes its record; the directory
//! and any tracking requester read it. There is no history: consumers judge
//! staleness from `updated_at`.

use crate::geo::Coordinate;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Latest known state of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPresence {
    pub agent_id: String,
    pub coordinate: Coordinate,
    /// Device-reported uncertainty radius (meters)
    pub accuracy_m: f64,
    /// Agent is online and accepting requests
    pub available: bool,
    pub updated_at: DateTime<Utc>,
}

impl AgentPresence {
    /// Updated no longer than `freshness` before `now`
    ///
    /// A timestamp in the future (clock skew) counts as fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, freshness: Duration) -> bool {
        now - self.updated_at <= freshness
    }

    /// Fresh and accepting requests
    pub fn is_eligible(&self, now: DateTime<Utc>, freshness: Duration) -> bool {
        self.available && self.is_fresh(now, freshness)
    }
}

/// Live position of a requester while a meeting is underway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequesterPosition {
    pub request_id: String,
    pub coordinate: Coordinate,
    pub accuracy_m: f64,
    pub updated_at: DateTime<Utc>,
}
