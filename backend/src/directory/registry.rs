//! Presence registry
//!
//! Agent presence and requester live positions, held in an [`ExpiringStore`]
//! with a TTL equal to the freshness window. Entries are also checked
//! against the [`Clock`], so a record past freshness is never served even
//! if the backend has not evicted it yet.

use super::DirectoryError;
use crate::core::time::Clock;
use crate::location::PositionSample;
use crate::models::{AgentPresence, RequesterPosition};
use crate::store::{get_json, put_json, ExpiringStore};
use chrono::Duration;
use log::{debug, info, warn};
use std::sync::Arc;

const AGENT_PREFIX: &str = "presence:agent:";
const REQUESTER_PREFIX: &str = "presence:requester:";

/// Last-write-wins store of who is where
#[derive(Clone)]
pub struct PresenceRegistry {
    store: Arc<dyn ExpiringStore>,
    clock: Arc<dyn Clock>,
    freshness: Duration,
}

impl std::fmt::Debug for PresenceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceRegistry")
            .field("clock", &self.clock)
            .field("freshness", &self.freshness)
            .finish_non_exhaustive()
    }
}

impl PresenceRegistry {
    pub fn new(store: Arc<dyn ExpiringStore>, clock: Arc<dyn Clock>, freshness: Duration) -> Self {
        Self {
            store,
            clock,
            freshness,
        }
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    fn ttl(&self) -> std::time::Duration {
        self.freshness.to_std().unwrap_or(std::time::Duration::ZERO)
    }

    // ========================================================================
    // Agents
    // ========================================================================

    /// Record an agent's position, keeping its availability flag
    ///
    /// An agent without a fresh record is reported offline.
    pub async fn report_agent(
        &self,
        agent_id: &str,
        sample: &PositionSample,
    ) -> Result<AgentPresence, DirectoryError> {
        let available = self
            .agent(agent_id)
            .await?
            .map_or(false, |presence| presence.available);
        self.write_agent(agent_id, sample, available).await
    }

    /// Switch an agent online or offline
    ///
    /// Going online needs a position: `sample` or a fresh previous one.
    pub async fn set_availability(
        &self,
        agent_id: &str,
        available: bool,
        sample: Option<&PositionSample>,
    ) -> Result<AgentPresence, DirectoryError> {
        let presence = match sample {
            Some(sample) => self.write_agent(agent_id, sample, available).await?,
            None => {
                let Some(mut presence) = self.agent(agent_id).await? else {
                    return Err(DirectoryError::NoPosition(agent_id.to_string()));
                };
                presence.available = available;
                presence.updated_at = self.clock.now();
                put_json(self.store.as_ref(), &agent_key(agent_id), &presence, self.ttl()).await?;
                presence
            }
        };
        info!(
            "Agent {} is now {}",
            agent_id,
            if available { "online" } else { "offline" }
        );
        Ok(presence)
    }

    /// Fresh presence of one agent
    pub async fn agent(&self, agent_id: &str) -> Result<Option<AgentPresence>, DirectoryError> {
        let presence: Option<AgentPresence> =
            get_json(self.store.as_ref(), &agent_key(agent_id)).await?;
        let now = self.clock.now();
        Ok(presence.filter(|p| p.is_fresh(now, self.freshness)))
    }

    /// Every fresh, available agent
    pub async fn eligible_agents(&self) -> Result<Vec<AgentPresence>, DirectoryError> {
        let now = self.clock.now();
        let mut eligible = Vec::new();
        for (key, json) in self.store.scan_prefix(AGENT_PREFIX).await? {
            match serde_json::from_str::<AgentPresence>(&json) {
                Ok(presence) if presence.is_eligible(now, self.freshness) => eligible.push(presence),
                Ok(_) => {}
                Err(err) => warn!("Skipping unreadable presence {}: {}", key, err),
            }
        }
        Ok(eligible)
    }

    async fn write_agent(
        &self,
        agent_id: &str,
        sample: &PositionSample,
        available: bool,
    ) -> Result<AgentPresence, DirectoryError> {
        if !sample.coordinate.is_valid() {
            return Err(DirectoryError::InvalidCoordinate);
        }
        let presence = AgentPresence {
            agent_id: agent_id.to_string(),
            coordinate: sample.coordinate,
            accuracy_m: sample.accuracy_m,
            available,
            updated_at: self.clock.now(),
        };
        put_json(self.store.as_ref(), &agent_key(agent_id), &presence, self.ttl()).await?;
        debug!("Presence of {} updated (accuracy {:.0} m)", agent_id, sample.accuracy_m);
        Ok(presence)
    }

    // ========================================================================
    // Requesters
    // ========================================================================

    pub async fn report_requester(
        &self,
        request_id: &str,
        sample: &PositionSample,
    ) -> Result<RequesterPosition, DirectoryError> {
        if !sample.coordinate.is_valid() {
            return Err(DirectoryError::InvalidCoordinate);
        }
        let position = RequesterPosition {
            request_id: request_id.to_string(),
            coordinate: sample.coordinate,
            accuracy_m: sample.accuracy_m,
            updated_at: self.clock.now(),
        };
        put_json(self.store.as_ref(), &requester_key(request_id), &position, self.ttl()).await?;
        Ok(position)
    }

    /// Fresh live position of a request's requester
    pub async fn requester(
        &self,
        request_id: &str,
    ) -> Result<Option<RequesterPosition>, DirectoryError> {
        let position: Option<RequesterPosition> =
            get_json(self.store.as_ref(), &requester_key(request_id)).await?;
        let now = self.clock.now();
        Ok(position.filter(|p| now - p.updated_at <= self.freshness))
    }

    pub async fn forget_requester(&self, request_id: &str) -> Result<(), DirectoryError> {
        self.store.remove(&requester_key(request_id)).await?;
        Ok(())
    }
}

fn agent_key(agent_id: &str) -> String {
    format!("{}{}", AGENT_PREFIX, agent_id)
}

fn requester_key(request_id: &str) -> String {
    format!("{}{}", REQUESTER_PREFIX, request_id)
}
