//! Staleness filters for poll responses
//!
//! Responses may arrive late, twice, or out of order. Each tracker keeps the
//! newest thing it accepted and drops anything that is not strictly newer,
//! judged by the record's own version or timestamp, never by arrival order.

use crate::core::config::TrackingConfig;
use crate::coordinator::CounterpartFix;
use crate::geo::{distance_meters, Coordinate};
use crate::models::WithdrawalRequest;
use crate::tracking::{PositionSmoother, TrackedPosition, TrackingError};
use chrono::{DateTime, Utc};
use log::debug;

/// Accepts request snapshots with increasing `version`
#[derive(Debug, Default)]
pub struct StatusTracker {
    last_version: Option<u64>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_version(&self) -> Option<u64> {
        self.last_version
    }

    /// `Some(request)` if newer than anything seen before
    pub fn observe(&mut self, request: WithdrawalRequest) -> Option<WithdrawalRequest> {
        if self.last_version.map_or(false, |v| request.version() <= v) {
            debug!(
                "Discarding stale status of {} (version {})",
                request.id(),
                request.version()
            );
            return None;
        }
        self.last_version = Some(request.version());
        Some(request)
    }
}

/// Accepts counterpart fixes with increasing `updated_at` and smooths them
///
/// A fix closer than the jitter threshold to the last one passed on is
/// swallowed, so clients only hear about real movement.
#[derive(Debug)]
pub struct PositionTracker {
    smoother: PositionSmoother,
    jitter_threshold_m: f64,
    last_update: Option<DateTime<Utc>>,
    last_reported: Option<Coordinate>,
}

impl PositionTracker {
    pub fn new(config: &TrackingConfig) -> Result<Self, TrackingError> {
        Ok(Self {
            smoother: PositionSmoother::new(config.smoothing_alpha)?,
            jitter_threshold_m: config.jitter_threshold_m,
            last_update: None,
            last_reported: None,
        })
    }

    pub fn current(&self) -> Option<&TrackedPosition> {
        self.smoother.current()
    }

    /// Smoothed position if `fix` carries a newer position
    pub fn observe(&mut self, fix: &CounterpartFix) -> Option<TrackedPosition> {
        let position = fix.position.as_ref()?;
        if self.last_update.map_or(false, |t| position.updated_at <= t) {
            debug!("Discarding stale counterpart position for {}", fix.request_id);
            return None;
        }
        self.last_update = Some(position.updated_at);
        if let Some(previous) = self.last_reported {
            let moved = distance_meters(&previous, &position.coordinate);
            if moved < self.jitter_threshold_m {
                debug!(
                    "Ignoring {:.1} m jitter of counterpart for {}",
                    moved, fix.request_id
                );
                return None;
            }
        }
        self.last_reported = Some(position.coordinate);
        let accuracy_m = position.accuracy_m.unwrap_or(0.0);
        Some(self.smoother.update(position.coordinate, accuracy_m, position.updated_at))
    }

    /// Tracking stopped; drop the smoothed history
    pub fn reset(&mut self) {
        self.smoother.reset();
        self.last_update = None;
        self.last_reported = None;
    }
}
