//! Distance, bearing and label formatting

use cash_courier_core_rs::geo::{
    bearing_degrees, destination_point, distance_meters, eta_from_route, format_distance,
    format_duration, interpolate, normalize_degrees, Coordinate, Eta, RouteEstimate,
    StraightLineRouting, TravelMode, UNKNOWN_ETA_LABEL,
};
use proptest::prelude::*;
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

fn close(actual: f64, expected: f64, tolerance: f64) -> bool {
    (actual - expected).abs() <= tolerance
}

fn coordinate() -> impl Strategy<Value = Coordinate> {
    (-85.0f64..85.0, -179.0f64..179.0).prop_map(|(lat, lng)| Coordinate::new(lat, lng))
}

// ============================================================================
// Test 1: Known distances
// ============================================================================

#[test]
fn test_one_degree_of_latitude() {
    let d = distance_meters(&Coordinate::new(0.0, 0.0), &Coordinate::new(1.0, 0.0));
    assert!(close(d, 111_195.08, 0.5), "got {}", d);
}

#[test]
fn test_short_urban_hop_at_equator() {
    let d = distance_meters(&Coordinate::new(0.0, 36.0), &Coordinate::new(0.0, 36.009));
    assert!(close(d, 1_000.76, 0.05), "got {}", d);
}

#[test]
fn test_equator_to_pole() {
    let d = distance_meters(&Coordinate::new(0.0, 0.0), &Coordinate::new(90.0, 0.0));
    assert!(close(d, 10_007_557.2, 1.0), "got {}", d);
}

#[test]
fn test_identical_points() {
    let p = Coordinate::new(-1.2864, 36.8172);
    assert_eq!(distance_meters(&p, &p), 0.0);
    assert_eq!(bearing_degrees(&p, &p), 0.0);
}

// ============================================================================
// Test 2: Bearings
// ============================================================================

#[test]
fn test_bearings_from_a_city_point() {
    let origin = Coordinate::new(-1.2864, 36.8172);
    for expected in [0.0, 45.0, 90.0, 180.0, 270.0] {
        let target = destination_point(&origin, expected, 500.0);
        let bearing = bearing_degrees(&origin, &target);
        let delta = (bearing - expected + 540.0).rem_euclid(360.0) - 180.0;
        assert!(delta.abs() < 0.01, "expected {}, got {}", expected, bearing);
    }
}

#[test]
fn test_bearing_across_antimeridian_points_east() {
    let west = Coordinate::new(0.0, 179.9);
    let east = Coordinate::new(0.0, -179.9);
    assert!(close(bearing_degrees(&west, &east), 90.0, 1e-6));
    assert!(distance_meters(&west, &east) < 23_000.0);
}

#[test]
fn test_interpolation_midpoint() {
    let a = Coordinate::new(-1.0, 36.0);
    let b = Coordinate::new(-1.002, 36.004);
    let mid = interpolate(&a, &b, 0.5);
    assert!(close(mid.lat, -1.001, 1e-12));
    assert!(close(mid.lng, 36.002, 1e-12));
    assert_eq!(interpolate(&a, &b, 0.0), a);
}

// ============================================================================
// Test 3: Labels
// ============================================================================

#[test]
fn test_distance_labels() {
    assert_eq!(format_distance(0.0), "0 m");
    assert_eq!(format_distance(12.4), "12 m");
    assert_eq!(format_distance(999.4), "999 m");
    assert_eq!(format_distance(999.6), "1.0 km");
    assert_eq!(format_distance(2_345.0), "2.3 km");
}

#[test]
fn test_duration_labels() {
    assert_eq!(format_duration(30.0), "<1 min");
    assert_eq!(format_duration(89.0), "1 min");
    assert_eq!(format_duration(90.0), "2 min");
    assert_eq!(format_duration(5_400.0), "1h 30m");
}

#[tokio::test]
async fn test_eta_for_walking_route() {
    let routing = StraightLineRouting::new(1.0);
    let origin = Coordinate::new(0.0, 36.0);
    let destination = destination_point(&origin, 90.0, 840.0);

    let eta = eta_from_route(
        &routing,
        origin,
        destination,
        TravelMode::Walking,
        Duration::from_secs(3),
    )
    .await
    .unwrap();

    assert!(close(eta.duration_seconds, 600.0, 0.5));
    assert_eq!(eta.duration_label, "10 min");
    assert_eq!(eta.distance_label, "840 m");
    assert_eq!(Eta::label_or_unknown(Some(&eta)), "10 min");
    assert_eq!(Eta::label_or_unknown(None), UNKNOWN_ETA_LABEL);
}

#[test]
fn test_eta_with_unusable_duration_reads_unknown() {
    for duration_seconds in [f64::NAN, f64::INFINITY, -30.0] {
        let eta = Eta::from_estimate(RouteEstimate {
            distance_meters: 500.0,
            duration_seconds,
        });
        assert_eq!(eta.duration_label, UNKNOWN_ETA_LABEL);
        assert_eq!(Eta::label_or_unknown(Some(&eta)), UNKNOWN_ETA_LABEL);
        assert_eq!(eta.distance_label, "500 m");
    }
}

// ============================================================================
// Test 4: Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_distance_is_symmetric(a in coordinate(), b in coordinate()) {
        let ab = distance_meters(&a, &b);
        let ba = distance_meters(&b, &a);
        prop_assert!((ab - ba).abs() < 1e-6 * ab.max(1.0));
    }

    #[test]
    fn prop_distance_is_non_negative_and_bounded(a in coordinate(), b in coordinate()) {
        let d = distance_meters(&a, &b);
        prop_assert!(d >= 0.0);
        prop_assert!(d <= 20_037_600.0);
    }

    #[test]
    fn prop_bearing_in_range(a in coordinate(), b in coordinate()) {
        let bearing = bearing_degrees(&a, &b);
        prop_assert!((0.0..360.0).contains(&bearing));
    }

    #[test]
    fn prop_normalize_is_idempotent(deg in -10_000.0f64..10_000.0) {
        let once = normalize_degrees(deg);
        prop_assert!((0.0..360.0).contains(&once));
        prop_assert_eq!(normalize_degrees(once), once);
    }

    #[test]
    fn prop_destination_point_travels_requested_distance(
        origin in coordinate(),
        bearing in 0.0f64..360.0,
        meters in 1.0f64..5_000.0,
    ) {
        let moved = destination_point(&origin, bearing, meters);
        prop_assert!((distance_meters(&origin, &moved) - meters).abs() < 0.01);
    }
}
