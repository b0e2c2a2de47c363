//! Route-based ETA
//!
//! The routing collaborator answers "how far and how long by road". This
//! module wraps it so a slow or failing provider only degrades the ETA
//! label to [`UNKNOWN_ETA_LABEL`]; it never propagates an error into the
//! matching flow.

use super::{distance_meters, format_distance, Coordinate};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Label shown when no route estimate could be obtained
pub const UNKNOWN_ETA_LABEL: &str = "unknown";

/// How the travelling party moves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TravelMode {
    #[default]
    Walking,
    Cycling,
    Driving,
}

impl TravelMode {
    /// Typical urban average speed in meters per second
    pub fn average_speed_mps(self) -> f64 {
        match self {
            TravelMode::Walking => 1.4,
            TravelMode::Cycling => 4.2,
            TravelMode::Driving => 8.3,
        }
    }
}

/// Raw answer from the routing collaborator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteEstimate {
    pub distance_meters: f64,
    pub duration_seconds: f64,
}

/// Errors a routing provider may report
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RoutingError {
    #[error("Routing provider unavailable: {0}")]
    Unavailable(String),

    #[error("No route between the given points")]
    NoRoute,

    #[error("Routing provider did not answer within {0:?}")]
    Timeout(Duration),
}

/// External routing/ETA collaborator
#[async_trait]
pub trait RoutingProvider: Send + Sync {
    /// Route distance and duration between two points
    async fn route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        mode: TravelMode,
    ) -> Result<RouteEstimate, RoutingError>;

    /// Route from one origin to many destinations
    ///
    /// The result is aligned with `destinations`; a destination the provider
    /// could not route is `None`. Providers with a native matrix endpoint
    /// should override this.
    async fn route_batch(
        &self,
        origin: Coordinate,
        destinations: &[Coordinate],
        mode: TravelMode,
    ) -> Result<Vec<Option<RouteEstimate>>, RoutingError> {
        let mut estimates = Vec::with_capacity(destinations.len());
        for destination in destinations {
            estimates.push(self.route(origin, *destination, mode).await.ok());
        }
        Ok(estimates)
    }
}

/// Routing estimator that needs no network
///
/// Road distance is approximated as the great-circle distance times a
/// detour factor, travelled at the mode's average speed.
#[derive(Debug, Clone, Copy)]
pub struct StraightLineRouting {
    detour_factor: f64,
}

impl StraightLineRouting {
    /// Street grids typically add 20-40% over the crow-flies distance
    pub const DEFAULT_DETOUR_FACTOR: f64 = 1.3;

    pub fn new(detour_factor: f64) -> Self {
        Self {
            detour_factor: detour_factor.max(1.0),
        }
    }
}

impl Default for StraightLineRouting {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DETOUR_FACTOR)
    }
}

#[async_trait]
impl RoutingProvider for StraightLineRouting {
    async fn route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        mode: TravelMode,
    ) -> Result<RouteEstimate, RoutingError> {
        let distance = distance_meters(&origin, &destination) * self.detour_factor;
        Ok(RouteEstimate {
            distance_meters: distance,
            duration_seconds: distance / mode.average_speed_mps(),
        })
    }
}

/// A labelled route estimate ready for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Eta {
    pub distance_meters: f64,
    pub duration_seconds: f64,
    pub distance_label: String,
    pub duration_label: String,
}

impl Eta {
    pub fn from_estimate(estimate: RouteEstimate) -> Self {
        Self {
            distance_meters: estimate.distance_meters,
            duration_seconds: estimate.duration_seconds,
            distance_label: format_distance(estimate.distance_meters),
            duration_label: format_duration(estimate.duration_seconds),
        }
    }

    /// Duration label, or [`UNKNOWN_ETA_LABEL`] when there is no estimate
    pub fn label_or_unknown(eta: Option<&Eta>) -> &str {
        eta.map(|e| e.duration_label.as_str())
            .unwrap_or(UNKNOWN_ETA_LABEL)
    }
}

/// Format a travel duration: `"<1 min"`, `"N min"` or `"Hh Mm"`
///
/// A negative or non-finite duration is not an estimate and gets
/// [`UNKNOWN_ETA_LABEL`].
///
/// # Example
/// ```
/// use cash_courier_core_rs::geo::format_duration;
///
/// assert_eq!(format_duration(42.0), "<1 min");
/// assert_eq!(format_duration(600.0), "10 min");
/// assert_eq!(format_duration(3_720.0), "1h 2m");
/// assert_eq!(format_duration(f64::NAN), "unknown");
/// ```
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return UNKNOWN_ETA_LABEL.to_string();
    }
    if seconds < 60.0 {
        return "<1 min".to_string();
    }
    let minutes = (seconds / 60.0).round() as i64;
    if minutes < 60 {
        format!("{} min", minutes)
    } else {
        format!("{}h {}m", minutes / 60, minutes % 60)
    }
}

/// Ask the provider for a route and label it
///
/// Returns `None` if the provider errors or exceeds `timeout`.
pub async fn eta_from_route(
    provider: &dyn RoutingProvider,
    origin: Coordinate,
    destination: Coordinate,
    mode: TravelMode,
    timeout: Duration,
) -> Option<Eta> {
    match tokio::time::timeout(timeout, provider.route(origin, destination, mode)).await {
        Ok(Ok(estimate)) => Some(Eta::from_estimate(estimate)),
        Ok(Err(err)) => {
            warn!("ETA unavailable, continuing without it: {}", err);
            None
        }
        Err(_) => {
            warn!("ETA unavailable, continuing without it: {}", RoutingError::Timeout(timeout));
            None
        }
    }
}

/// Batch variant of [`eta_from_route`], aligned with `destinations`
///
/// A provider failure yields `None` for every destination.
pub async fn eta_batch(
    provider: &dyn RoutingProvider,
    origin: Coordinate,
    destinations: &[Coordinate],
    mode: TravelMode,
    timeout: Duration,
) -> Vec<Option<Eta>> {
    if destinations.is_empty() {
        return Vec::new();
    }
    match tokio::time::timeout(timeout, provider.route_batch(origin, destinations, mode)).await {
        Ok(Ok(estimates)) if estimates.len() == destinations.len() => estimates
            .into_iter()
            .map(|estimate| estimate.map(Eta::from_estimate))
            .collect(),
        Ok(Ok(estimates)) => {
            warn!(
                "Routing batch returned {} results for {} destinations; ignoring",
                estimates.len(),
                destinations.len()
            );
            vec![None; destinations.len()]
        }
        Ok(Err(err)) => {
            warn!("Batch ETA unavailable: {}", err);
            vec![None; destinations.len()]
        }
        Err(_) => {
            debug!("Batch ETA timed out after {:?}", timeout);
            vec![None; destinations.len()]
        }
    }
}
