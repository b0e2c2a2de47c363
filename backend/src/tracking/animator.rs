//! Marker animation between smoothed positions
//!
//! Each new target starts a segment from wherever the marker is drawn now,
//! so a retarget mid-animation never jumps. Duration grows with the jump
//! length inside configured bounds; progress follows an ease-out cubic and
//! the heading turns the short way round.

use super::TrackedPosition;
use crate::core::config::TrackingConfig;
use crate::geo::{distance_meters, interpolate, normalize_degrees, Coordinate};
use std::time::{Duration, Instant};

/// `1 − (1 − t)³`, with `t` clamped to [0, 1]
pub fn ease_out_cubic(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t).powi(3)
}

/// Signed turn from `from` to `to` in [-180, 180)
///
/// # Example
/// ```
/// use cash_courier_core_rs::tracking::shortest_heading_delta;
///
/// assert_eq!(shortest_heading_delta(350.0, 10.0), 20.0);
/// assert_eq!(shortest_heading_delta(10.0, 350.0), -20.0);
/// ```
pub fn shortest_heading_delta(from: f64, to: f64) -> f64 {
    (to - from + 540.0).rem_euclid(360.0) - 180.0
}

/// What is drawn at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayFrame {
    pub coordinate: Coordinate,
    pub heading_deg: f64,
    /// Eased progress of the current segment, 1.0 when at rest
    pub progress: f64,
}

/// How a new target was handled
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnimationPlan {
    /// First position: drawn in place without animation
    Snapped,
    /// Closer than the jitter threshold: ignored
    Suppressed,
    Animated { duration: Duration },
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    from: DisplayFrame,
    to: Coordinate,
    heading_delta: f64,
    started: Instant,
    duration: Duration,
}

#[derive(Debug, Clone)]
pub struct MarkerAnimator {
    config: TrackingConfig,
    rest: Option<DisplayFrame>,
    segment: Option<Segment>,
}

impl MarkerAnimator {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            rest: None,
            segment: None,
        }
    }

    /// Animation length for a jump of `distance_m`
    pub fn duration_for(&self, distance_m: f64) -> Duration {
        let ms = (distance_m.max(0.0) * self.config.animation_ms_per_meter).round() as u64;
        Duration::from_millis(ms.clamp(self.config.min_animation_ms, self.config.max_animation_ms))
    }

    /// Start moving towards `target`
    pub fn retarget(&mut self, target: &TrackedPosition, now: Instant) -> AnimationPlan {
        let Some(current) = self.frame_at(now) else {
            self.rest = Some(DisplayFrame {
                coordinate: target.coordinate,
                heading_deg: target.heading_deg,
                progress: 1.0,
            });
            return AnimationPlan::Snapped;
        };

        let distance = distance_meters(&current.coordinate, &target.coordinate);
        if distance < self.config.jitter_threshold_m {
            return AnimationPlan::Suppressed;
        }

        let duration = self.duration_for(distance);
        self.segment = Some(Segment {
            from: current,
            to: target.coordinate,
            heading_delta: shortest_heading_delta(current.heading_deg, target.heading_deg),
            started: now,
            duration,
        });
        self.rest = Some(DisplayFrame {
            coordinate: target.coordinate,
            heading_deg: normalize_degrees(target.heading_deg),
            progress: 1.0,
        });
        AnimationPlan::Animated { duration }
    }

    /// Frame to draw at `now`; `None` before the first target
    pub fn frame_at(&self, now: Instant) -> Option<DisplayFrame> {
        let rest = self.rest?;
        let Some(segment) = self.segment else {
            return Some(rest);
        };

        let elapsed = now.saturating_duration_since(segment.started);
        if elapsed >= segment.duration {
            return Some(rest);
        }

        let t = elapsed.as_secs_f64() / segment.duration.as_secs_f64();
        let eased = ease_out_cubic(t);
        Some(DisplayFrame {
            coordinate: interpolate(&segment.from.coordinate, &segment.to, eased),
            heading_deg: normalize_degrees(segment.from.heading_deg + segment.heading_delta * eased),
            progress: eased,
        })
    }

    pub fn is_animating(&self, now: Instant) -> bool {
        self.segment
            .map_or(false, |s| now.saturating_duration_since(s.started) < s.duration)
    }

    /// Drop everything; tracking stopped
    pub fn clear(&mut self) {
        self.rest = None;
        self.segment = None;
    }
}
