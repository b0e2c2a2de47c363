//! Nearby-agent directory
//!
//! Lists fresh, available agents within a radius of the requester, enriched
//! with a route ETA where the routing provider can give one.
//!
//! # Ordering
//!
//! When every candidate has an ETA the list is sorted by ETA; otherwise it is
//! sorted by straight-line distance. Ties break on distance, then agent id.
//!
//! An empty result is normal. [`NearbyAgentDirectory::scan_until_found`]
//! repeats the query on a fixed interval until someone shows up.

pub mod registry;

use crate::geo::{distance_meters, eta_batch, format_distance, Coordinate, Eta, RoutingProvider, TravelMode};
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use registry::PresenceRegistry;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DirectoryError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Agent {0} has no known position")]
    NoPosition(String),

    #[error("Invalid coordinate")]
    InvalidCoordinate,

    #[error("Location accuracy {accuracy_m:.0} m is worse than the required {required_m:.0} m")]
    AccuracyTooLow { accuracy_m: f64, required_m: f64 },

    #[error("Search radius must be positive, got {0} km")]
    InvalidRadius(f64),
}

/// One agent offered to a requester
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCandidate {
    pub agent_id: String,
    pub coordinate: Coordinate,
    pub accuracy_m: f64,
    /// Straight-line distance from the search center (meters)
    pub distance_meters: f64,
    pub distance_label: String,
    pub eta: Option<Eta>,
    pub updated_at: DateTime<Utc>,
}

/// Query side of agent presence
#[derive(Clone)]
pub struct NearbyAgentDirectory {
    registry: PresenceRegistry,
    routing: Option<Arc<dyn RoutingProvider>>,
    travel_mode: TravelMode,
    routing_timeout: Duration,
}

impl std::fmt::Debug for NearbyAgentDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NearbyAgentDirectory")
            .field("registry", &self.registry)
            .field("has_routing", &self.routing.is_some())
            .field("travel_mode", &self.travel_mode)
            .field("routing_timeout", &self.routing_timeout)
            .finish()
    }
}

impl NearbyAgentDirectory {
    pub fn new(
        registry: PresenceRegistry,
        routing: Option<Arc<dyn RoutingProvider>>,
        travel_mode: TravelMode,
        routing_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            routing,
            travel_mode,
            routing_timeout,
        }
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    /// Eligible agents within `radius_km` of `center`
    pub async fn find(
        &self,
        center: Coordinate,
        radius_km: f64,
    ) -> Result<Vec<AgentCandidate>, DirectoryError> {
        self.find_excluding(center, radius_km, &HashSet::new()).await
    }

    /// Like [`find`](Self::find), leaving out the agents in `exclude`
    pub async fn find_excluding(
        &self,
        center: Coordinate,
        radius_km: f64,
        exclude: &HashSet<String>,
    ) -> Result<Vec<AgentCandidate>, DirectoryError> {
        if !center.is_valid() {
            return Err(DirectoryError::InvalidCoordinate);
        }
        if !(radius_km > 0.0) {
            return Err(DirectoryError::InvalidRadius(radius_km));
        }
        let radius_m = radius_km * 1_000.0;

        let mut candidates: Vec<AgentCandidate> = self
            .registry
            .eligible_agents()
            .await?
            .into_iter()
            .filter(|presence| !exclude.contains(&presence.agent_id))
            .filter_map(|presence| {
                let distance = distance_meters(&center, &presence.coordinate);
                (distance <= radius_m).then(|| AgentCandidate {
                    agent_id: presence.agent_id,
                    coordinate: presence.coordinate,
                    accuracy_m: presence.accuracy_m,
                    distance_meters: distance,
                    distance_label: format_distance(distance),
                    eta: None,
                    updated_at: presence.updated_at,
                })
            })
            .collect();

        if let Some(routing) = &self.routing {
            let destinations: Vec<Coordinate> = candidates.iter().map(|c| c.coordinate).collect();
            let etas = eta_batch(
                routing.as_ref(),
                center,
                &destinations,
                self.travel_mode,
                self.routing_timeout,
            )
            .await;
            for (candidate, eta) in candidates.iter_mut().zip(etas) {
                candidate.eta = eta;
            }
        }

        sort_candidates(&mut candidates);
        debug!(
            "{} agent(s) within {:.1} km of ({:.5}, {:.5})",
            candidates.len(),
            radius_km,
            center.lat,
            center.lng
        );
        Ok(candidates)
    }

    /// Repeat [`find`](Self::find) every `interval` until it returns agents
    ///
    /// Returns `Ok(None)` if `cancel` fires first.
    pub async fn scan_until_found(
        &self,
        center: Coordinate,
        radius_km: f64,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<AgentCandidate>>, DirectoryError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let candidates = self.find(center, radius_km).await?;
            if !candidates.is_empty() {
                info!("Found {} agent(s) after {} scan(s)", candidates.len(), attempts);
                return Ok(Some(candidates));
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

fn sort_candidates(candidates: &mut [AgentCandidate]) {
    let by_eta = candidates.iter().all(|c| c.eta.is_some());
    candidates.sort_by(|a, b| {
        let primary = match (by_eta, &a.eta, &b.eta) {
            (true, Some(ea), Some(eb)) => ea.duration_seconds.total_cmp(&eb.duration_seconds),
            _ => Ordering::Equal,
        };
        primary
            .then(a.distance_meters.total_cmp(&b.distance_meters))
            .then_with(|| a.agent_id.cmp(&b.agent_id))
    });
}
