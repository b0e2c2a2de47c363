//! Exponential moving average over coordinates
//!
//! `s_i = s_{i-1} + α (raw_i − s_{i-1})`, seeded with the first sample.
//! Longitude deltas are taken across the antimeridian the short way.

use super::{TrackedPosition, TrackingError};
use crate::geo::{bearing_degrees, distance_meters, interpolate, Coordinate};
use chrono::{DateTime, Utc};

/// Below this the heading is left as it was (meters)
const HEADING_MIN_MOVE_M: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct PositionSmoother {
    alpha: f64,
    current: Option<TrackedPosition>,
}

impl PositionSmoother {
    /// # Errors
    /// `alpha` outside (0, 1]
    pub fn new(alpha: f64) -> Result<Self, TrackingError> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(TrackingError::InvalidAlpha(alpha));
        }
        Ok(Self {
            alpha,
            current: None,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn current(&self) -> Option<&TrackedPosition> {
        self.current.as_ref()
    }

    /// Fold one raw fix into the smoothed position
    pub fn update(
        &mut self,
        raw: Coordinate,
        accuracy_m: f64,
        at: DateTime<Utc>,
    ) -> TrackedPosition {
        let next = match self.current {
            None => TrackedPosition {
                coordinate: raw,
                heading_deg: 0.0,
                accuracy_m,
                updated_at: at,
            },
            Some(prev) => {
                let coordinate = interpolate(&prev.coordinate, &raw, self.alpha);

                let heading_deg =
                    if distance_meters(&prev.coordinate, &coordinate) >= HEADING_MIN_MOVE_M {
                        bearing_degrees(&prev.coordinate, &coordinate)
                    } else {
                        prev.heading_deg
                    };

                TrackedPosition {
                    coordinate,
                    heading_deg,
                    accuracy_m: prev.accuracy_m + self.alpha * (accuracy_m - prev.accuracy_m),
                    updated_at: at,
                }
            }
        };
        self.current = Some(next);
        next
    }

    /// Forget all history; the next fix seeds the average again
    pub fn reset(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    #[test]
    fn test_first_sample_seeds_average() {
        let mut smoother = PositionSmoother::new(0.35).unwrap();
        let raw = Coordinate::new(-1.2864, 36.8172);
        let tracked = smoother.update(raw, 12.0, at());
        assert_eq!(tracked.coordinate, raw);
        assert_eq!(tracked.accuracy_m, 12.0);
    }

    #[test]
    fn test_update_moves_alpha_of_the_way() {
        let mut smoother = PositionSmoother::new(0.5).unwrap();
        smoother.update(Coordinate::new(0.0, 0.0), 10.0, at());
        let tracked = smoother.update(Coordinate::new(0.001, 0.002), 10.0, at());
        assert!((tracked.coordinate.lat - 0.0005).abs() < 1e-9);
        assert!((tracked.coordinate.lng - 0.001).abs() < 1e-9);
        assert!(tracked.heading_deg > 0.0 && tracked.heading_deg < 90.0);
    }

    #[test]
    fn test_alpha_one_follows_raw_exactly() {
        let mut smoother = PositionSmoother::new(1.0).unwrap();
        smoother.update(Coordinate::new(0.0, 0.0), 10.0, at());
        let raw = Coordinate::new(0.01, 0.01);
        let tracked = smoother.update(raw, 10.0, at());
        assert!(distance_meters(&tracked.coordinate, &raw) < 1e-6);
    }

    #[test]
    fn test_antimeridian_takes_short_way() {
        let mut smoother = PositionSmoother::new(0.5).unwrap();
        smoother.update(Coordinate::new(0.0, 179.9), 10.0, at());
        let tracked = smoother.update(Coordinate::new(0.0, -179.9), 10.0, at());
        assert!((tracked.coordinate.lng.abs() - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_out_of_range_alpha() {
        assert_eq!(PositionSmoother::new(0.0), Err(TrackingError::InvalidAlpha(0.0)));
        assert!(PositionSmoother::new(1.5).is_err());
        assert!(PositionSmoother::new(f64::NAN).is_err());
    }

    #[test]
    fn test_reset_reseeds() {
        let mut smoother = PositionSmoother::new(0.2).unwrap();
        smoother.update(Coordinate::new(0.0, 0.0), 10.0, at());
        smoother.reset();
        assert!(smoother.current().is_none());
        let raw = Coordinate::new(1.0, 1.0);
        assert_eq!(smoother.update(raw, 10.0, at()).coordinate, raw);
    }
}
