//! Counterpart position display
//!
//! Raw counterpart fixes are noisy. [`PositionSmoother`] filters them with an
//! exponential moving average; [`MarkerAnimator`] moves the displayed marker
//! between smoothed positions. Neither knows anything about requests.

pub mod animator;
pub mod smoother;

use crate::geo::Coordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use animator::{ease_out_cubic, shortest_heading_delta, AnimationPlan, DisplayFrame, MarkerAnimator};
pub use smoother::PositionSmoother;

/// Smoothed coordinate and heading, local to one tracking session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackedPosition {
    pub coordinate: Coordinate,
    /// Degrees clockwise from north, in [0, 360)
    pub heading_deg: f64,
    pub accuracy_m: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrackingError {
    #[error("Smoothing factor must be in (0, 1], got {0}")]
    InvalidAlpha(f64),
}
