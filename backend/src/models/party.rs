//! Parties taking part in a withdrawal

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of a withdrawal an action comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    /// The user asking for cash
    Requester,
    /// The field courier delivering cash
    Agent,
}

impl Party {
    /// The other side of the meeting
    pub fn counterpart(self) -> Party {
        match self {
            Party::Requester => Party::Agent,
            Party::Agent => Party::Requester,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Party::Requester => "requester",
            Party::Agent => "agent",
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete participant: a party plus its user/agent id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub party: Party,
    pub id: String,
}

impl Actor {
    pub fn requester(id: impl Into<String>) -> Self {
        Self {
            party: Party::Requester,
            id: id.into(),
        }
    }

    pub fn agent(id: impl Into<String>) -> Self {
        Self {
            party: Party::Agent,
            id: id.into(),
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.party, self.id)
    }
}

/// Who travels to whom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingType {
    /// The requester walks/drives to the agent
    RequesterTravels,
    /// The agent comes to the requester
    AgentTravels,
}
