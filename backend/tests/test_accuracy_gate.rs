//! Location accuracy gate under simulated time
//!
//! Readings come from a scripted source; tokio's paused clock makes the
//! 20 second deadline deterministic.

use cash_courier_core_rs::core::time::ManualClock;
use cash_courier_core_rs::directory::DirectoryError;
use cash_courier_core_rs::geo::Coordinate;
use cash_courier_core_rs::location::{
    AccuracyGate, AccuracyTier, GateOutcome, LocationError, PositionSample, ReplaySource,
    SourceError,
};
use cash_courier_core_rs::{Clock, CoreConfig, CoreError, ErrorClass, MemoryLedger, WithdrawalService};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Helpers
// ============================================================================

fn reading(accuracy_m: f64) -> PositionSample {
    PositionSample::new(
        Coordinate::new(-1.2864, 36.8172),
        accuracy_m,
        DateTime::<Utc>::UNIX_EPOCH,
    )
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// Paused timers may round deadlines up by a tick
fn assert_elapsed(started: Instant, expected: Duration) {
    let elapsed = started.elapsed();
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(100),
        "elapsed {:?}, expected {:?}",
        elapsed,
        expected
    );
}

fn matching_gate() -> AccuracyGate {
    AccuracyGate::for_tier(AccuracyTier::Matching, &CoreConfig::default())
}

// ============================================================================
// Test 1: Early acceptance
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_returns_as_soon_as_reading_is_precise() {
    let source = ReplaySource::new()
        .then(secs(2), reading(120.0))
        .then(secs(3), reading(40.0))
        .then(secs(1), reading(5.0));
    let started = Instant::now();

    let outcome = matching_gate().acquire_from(source).await.unwrap();

    assert_eq!(outcome, GateOutcome::Precise(reading(40.0)));
    assert_elapsed(started, secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_threshold_is_inclusive() {
    let source = ReplaySource::new().then(secs(1), reading(50.0));
    let outcome = matching_gate().acquire_from(source).await.unwrap();
    assert!(outcome.is_precise());
}

// ============================================================================
// Test 2: Deadline
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_deadline_returns_best_reading_seen() {
    let source = ReplaySource::new()
        .then(secs(4), reading(300.0))
        .then(secs(4), reading(90.0))
        .then(secs(4), reading(140.0))
        .then(secs(30), reading(10.0));
    let started = Instant::now();

    let outcome = matching_gate().acquire_from(source).await.unwrap();

    assert_eq!(outcome, GateOutcome::Degraded(reading(90.0)));
    assert_elapsed(started, secs(20));
}

#[tokio::test(start_paused = true)]
async fn test_no_reading_before_deadline_is_no_signal() {
    let source = ReplaySource::new().then(secs(60), reading(5.0));

    let err = matching_gate().acquire_from(source).await.unwrap_err();

    assert_eq!(err, LocationError::NoSignal(secs(20)));
    assert!(err.is_recoverable());
}

#[tokio::test(start_paused = true)]
async fn test_silent_source_ends_without_waiting_for_deadline() {
    let started = Instant::now();
    let err = matching_gate()
        .acquire_from(ReplaySource::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LocationError::NoSignal(_)));
    assert!(started.elapsed() < secs(1));
}

// ============================================================================
// Test 3: Source failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_permission_denied_is_immediate_and_final() {
    let source = ReplaySource::new()
        .then(secs(1), reading(200.0))
        .then_fail(secs(1), SourceError::PermissionDenied)
        .then(secs(1), reading(5.0));
    let started = Instant::now();

    let err = matching_gate().acquire_from(source).await.unwrap_err();

    assert_eq!(err, LocationError::PermissionDenied);
    assert!(!err.is_recoverable());
    assert_elapsed(started, secs(2));
    assert!(CoreError::from(err).user_message().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_failed_readings_are_skipped() {
    let source = ReplaySource::new()
        .then_fail(secs(1), SourceError::Unavailable("cold start".to_string()))
        .then_fail(secs(1), SourceError::Unavailable("no fix".to_string()))
        .then(secs(1), reading(30.0));

    let outcome = matching_gate().acquire_from(source).await.unwrap();

    assert_eq!(outcome, GateOutcome::Precise(reading(30.0)));
}

// ============================================================================
// Test 4: Tiers
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_go_online_tier_accepts_what_matching_degrades() {
    let config = CoreConfig::default();
    let script = || ReplaySource::new().then(secs(1), reading(120.0));

    let matching = AccuracyGate::for_tier(AccuracyTier::Matching, &config)
        .acquire_from(script())
        .await
        .unwrap();
    let go_online = AccuracyGate::for_tier(AccuracyTier::GoOnline, &config)
        .acquire_from(script())
        .await
        .unwrap();

    assert!(!matching.is_precise());
    assert!(go_online.is_precise());
}

#[tokio::test]
async fn test_agent_cannot_go_online_with_poor_accuracy() {
    let clock = Arc::new(ManualClock::starting_at_epoch());
    let service = WithdrawalService::in_memory(
        CoreConfig::default(),
        clock.clone(),
        Arc::new(MemoryLedger::new()),
        None,
    )
    .unwrap();
    let position = Coordinate::new(-1.2864, 36.8172);

    let err = service
        .set_availability(
            "AGENT_A",
            true,
            Some(&PositionSample::new(position, 400.0, clock.now())),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Directory(DirectoryError::AccuracyTooLow { .. })
    ));
    assert_eq!(err.kind(), ErrorClass::Location);

    let presence = service
        .set_availability(
            "AGENT_A",
            true,
            Some(&PositionSample::new(position, 120.0, clock.now())),
        )
        .await
        .unwrap();
    assert!(presence.available);
}

#[tokio::test]
async fn test_going_offline_needs_no_position() {
    let service = WithdrawalService::in_memory(
        CoreConfig::default(),
        Arc::new(ManualClock::starting_at_epoch()),
        Arc::new(MemoryLedger::new()),
        None,
    )
    .unwrap();
    let position = Coordinate::new(-1.2864, 36.8172);
    service
        .report_position(
            "AGENT_A",
            &PositionSample::new(position, 20.0, DateTime::<Utc>::UNIX_EPOCH),
        )
        .await
        .unwrap();

    let presence = service.set_availability("AGENT_A", false, None).await.unwrap();

    assert!(!presence.available);
}
