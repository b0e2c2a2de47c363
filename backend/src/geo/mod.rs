//! Distance / Bearing / ETA engine
//!
//! Pure great-circle math used by the directory (candidate distance), the
//! sync loop (distance and heading to the counterpart) and the animator.
//! Route-based ETA lives in [`eta`] because it depends on an external
//! routing collaborator.
//!
//! # Accuracy
//!
//! Haversine on a spherical Earth (mean radius). Urban-scale distances are
//! the target; antipodal stability is not a concern here.

pub mod eta;

use serde::{Deserialize, Serialize};

pub use eta::{
    eta_batch, eta_from_route, format_duration, Eta, RouteEstimate, RoutingError,
    RoutingProvider, StraightLineRouting, TravelMode, UNKNOWN_ETA_LABEL,
};

/// Mean Earth radius in meters (IUGG)
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A WGS84 latitude/longitude pair in decimal degrees
///
/// # Example
/// ```
/// use cash_courier_core_rs::geo::Coordinate;
///
/// let nairobi = Coordinate::new(-1.2864, 36.8172);
/// assert!(nairobi.is_valid());
/// assert_eq!(nairobi.distance_to(&nairobi), 0.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// True when both components are finite and inside WGS84 bounds
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Great-circle distance to `other` in meters
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        distance_meters(self, other)
    }

    /// Initial compass bearing towards `other`, in [0, 360)
    pub fn bearing_to(&self, other: &Coordinate) -> f64 {
        bearing_degrees(self, other)
    }
}

/// Haversine great-circle distance in meters
///
/// # Example
/// ```
/// use cash_courier_core_rs::geo::{distance_meters, Coordinate};
///
/// let a = Coordinate::new(0.0, 0.0);
/// let b = Coordinate::new(0.0, 1.0);
/// let d = distance_meters(&a, &b);
/// assert!((d - 111_195.0).abs() < 10.0); // one degree of longitude at the equator
/// ```
pub fn distance_meters(a: &Coordinate, b: &Coordinate) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lng - a.lng).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1 for near-antipodal points
    let h = h.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Initial compass bearing from `from` to `to` in degrees, in [0, 360)
///
/// 0 is north, 90 east. Identical points yield 0.
pub fn bearing_degrees(from: &Coordinate, to: &Coordinate) -> f64 {
    let phi1 = from.lat.to_radians();
    let phi2 = to.lat.to_radians();
    let d_lambda = (to.lng - from.lng).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();

    normalize_degrees(y.atan2(x).to_degrees())
}

/// Wrap any angle into [0, 360)
pub fn normalize_degrees(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Point reached by travelling `distance_m` from `origin` along `bearing_deg`
///
/// Used to synthesise movement (simulated agents, test fixtures).
pub fn destination_point(origin: &Coordinate, bearing_deg: f64, distance_m: f64) -> Coordinate {
    let delta = distance_m / EARTH_RADIUS_M;
    let theta = bearing_deg.to_radians();
    let phi1 = origin.lat.to_radians();
    let lambda1 = origin.lng.to_radians();

    let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos()).asin();
    let lambda2 = lambda1
        + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());

    Coordinate::new(phi2.to_degrees(), wrap_longitude(lambda2.to_degrees()))
}

/// Linear interpolation between two nearby coordinates (`t` in [0, 1])
///
/// Adequate for the short hops the animator draws; not a geodesic.
pub fn interpolate(from: &Coordinate, to: &Coordinate, t: f64) -> Coordinate {
    let t = t.clamp(0.0, 1.0);
    let mut d_lng = to.lng - from.lng;
    if d_lng > 180.0 {
        d_lng -= 360.0;
    } else if d_lng < -180.0 {
        d_lng += 360.0;
    }
    Coordinate::new(
        from.lat + (to.lat - from.lat) * t,
        wrap_longitude(from.lng + d_lng * t),
    )
}

fn wrap_longitude(lng: f64) -> f64 {
    ((lng + 540.0).rem_euclid(360.0)) - 180.0
}

/// Human label for a distance: whole meters below 1 km, km with one decimal above
///
/// # Example
/// ```
/// use cash_courier_core_rs::geo::format_distance;
///
/// assert_eq!(format_distance(800.0), "800 m");
/// assert_eq!(format_distance(1_540.0), "1.5 km");
/// ```
pub fn format_distance(meters: f64) -> String {
    let rounded = meters.max(0.0).round();
    if rounded < 1000.0 {
        format!("{} m", rounded as i64)
    } else {
        format!("{:.1} km", meters / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = Coordinate::new(0.0, 0.0);
        assert!((bearing_degrees(&origin, &Coordinate::new(1.0, 0.0)) - 0.0).abs() < 1e-9);
        assert!((bearing_degrees(&origin, &Coordinate::new(0.0, 1.0)) - 90.0).abs() < 1e-9);
        assert!((bearing_degrees(&origin, &Coordinate::new(-1.0, 0.0)) - 180.0).abs() < 1e-9);
        assert!((bearing_degrees(&origin, &Coordinate::new(0.0, -1.0)) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_degrees_never_returns_360() {
        assert_eq!(normalize_degrees(360.0), 0.0);
        assert_eq!(normalize_degrees(-90.0), 270.0);
        assert!(normalize_degrees(-1e-15) < 360.0);
    }

    #[test]
    fn test_destination_point_round_trips_distance() {
        let origin = Coordinate::new(-1.2864, 36.8172);
        let moved = destination_point(&origin, 45.0, 800.0);
        assert!((distance_meters(&origin, &moved) - 800.0).abs() < 0.01);
        assert!((bearing_degrees(&origin, &moved) - 45.0).abs() < 0.1);
    }

    #[test]
    fn test_invalid_coordinates() {
        assert!(!Coordinate::new(91.0, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, 181.0).is_valid());
        assert!(!Coordinate::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_format_distance_boundary() {
        assert_eq!(format_distance(999.4), "999 m");
        assert_eq!(format_distance(999.6), "1.0 km");
        assert_eq!(format_distance(12_345.0), "12.3 km");
    }
}
