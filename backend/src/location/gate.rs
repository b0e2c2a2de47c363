//! Geolocation accuracy gate
//!
//! Reads samples until one is accurate enough, keeping the best seen so far.
//!
//! # Critical Invariants
//!
//! 1. A sample at or under the threshold ends acquisition immediately
//! 2. At the deadline the best sample wins; with no sample the result is
//!    [`LocationError::NoSignal`]
//! 3. A permission denial aborts at once and is never retried
//! 4. The gate has no side effects: degraded accuracy is reported, not acted on

use super::{LocationError, LocationSource, LocationSubscription, PositionSample, SourceError};
use crate::core::config::{AccuracyTiers, CoreConfig};
use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use std::time::Duration;

/// Accuracy required for a given purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccuracyTier {
    /// Creating or matching a request
    Matching,
    /// An agent going online
    GoOnline,
}

impl AccuracyTier {
    pub fn threshold_m(self, tiers: &AccuracyTiers) -> f64 {
        match self {
            AccuracyTier::Matching => tiers.matching_m,
            AccuracyTier::GoOnline => tiers.go_online_m,
        }
    }
}

/// Result of a successful acquisition
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateOutcome {
    /// Within the threshold
    Precise(PositionSample),
    /// Deadline reached; best sample seen, above the threshold
    Degraded(PositionSample),
}

impl GateOutcome {
    pub fn sample(&self) -> &PositionSample {
        match self {
            GateOutcome::Precise(sample) | GateOutcome::Degraded(sample) => sample,
        }
    }

    pub fn is_precise(&self) -> bool {
        matches!(self, GateOutcome::Precise(_))
    }
}

/// Acquire a position of at least a target accuracy within a hard deadline
///
/// # Example
/// ```
/// use cash_courier_core_rs::location::{AccuracyGate, AccuracyTier};
/// use cash_courier_core_rs::CoreConfig;
///
/// let gate = AccuracyGate::for_tier(AccuracyTier::Matching, &CoreConfig::default());
/// assert_eq!(gate.target_accuracy_m(), 50.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AccuracyGate {
    target_accuracy_m: f64,
    max_wait: Duration,
}

impl AccuracyGate {
    pub fn new(target_accuracy_m: f64, max_wait: Duration) -> Self {
        Self {
            target_accuracy_m,
            max_wait,
        }
    }

    pub fn for_tier(tier: AccuracyTier, config: &CoreConfig) -> Self {
        Self::new(tier.threshold_m(&config.accuracy), config.gate_max_wait())
    }

    pub fn target_accuracy_m(&self) -> f64 {
        self.target_accuracy_m
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Consume `stream` until a precise sample, the deadline, or its end
    pub async fn acquire<S>(&self, stream: &mut S) -> Result<GateOutcome, LocationError>
    where
        S: Stream<Item = Result<PositionSample, SourceError>> + Unpin,
    {
        let deadline = tokio::time::sleep(self.max_wait);
        tokio::pin!(deadline);
        let mut best: Option<PositionSample> = None;

        loop {
            let reading = tokio::select! {
                _ = &mut deadline => break,
                reading = stream.next() => reading,
            };

            match reading {
                None => break,
                Some(Err(SourceError::PermissionDenied)) => {
                    warn!("Location permission denied, aborting acquisition");
                    return Err(LocationError::PermissionDenied);
                }
                Some(Err(SourceError::Unavailable(reason))) => {
                    debug!("Skipping failed location reading: {}", reason);
                }
                Some(Ok(sample)) => {
                    if sample.accuracy_m <= self.target_accuracy_m {
                        debug!(
                            "Accepted position with accuracy {:.0} m (target {:.0} m)",
                            sample.accuracy_m, self.target_accuracy_m
                        );
                        return Ok(GateOutcome::Precise(sample));
                    }
                    if best.map_or(true, |b| sample.accuracy_m < b.accuracy_m) {
                        best = Some(sample);
                    }
                }
            }
        }

        match best {
            Some(sample) => {
                info!(
                    "Best position has accuracy {:.0} m, above target {:.0} m",
                    sample.accuracy_m, self.target_accuracy_m
                );
                Ok(GateOutcome::Degraded(sample))
            }
            None => {
                warn!("No location reading within {:?}", self.max_wait);
                Err(LocationError::NoSignal(self.max_wait))
            }
        }
    }

    /// Subscribe to `source`, acquire, then stop the subscription
    pub async fn acquire_from<S>(&self, source: S) -> Result<GateOutcome, LocationError>
    where
        S: LocationSource + 'static,
    {
        let (subscription, mut stream) = LocationSubscription::start(source);
        let outcome = self.acquire(&mut stream).await;
        subscription.stop();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinate;
    use chrono::{DateTime, Utc};
    use futures::stream;

    fn sample(accuracy_m: f64) -> PositionSample {
        PositionSample::new(
            Coordinate::new(-1.28, 36.82),
            accuracy_m,
            DateTime::<Utc>::UNIX_EPOCH,
        )
    }

    fn gate() -> AccuracyGate {
        AccuracyGate::new(50.0, Duration::from_secs(20))
    }

    #[tokio::test]
    async fn test_first_precise_sample_wins() {
        let mut readings = stream::iter(vec![Ok(sample(120.0)), Ok(sample(45.0)), Ok(sample(5.0))]);
        let outcome = gate().acquire(&mut readings).await.unwrap();
        assert_eq!(outcome, GateOutcome::Precise(sample(45.0)));
    }

    #[tokio::test]
    async fn test_exhausted_stream_returns_best_sample() {
        let mut readings = stream::iter(vec![Ok(sample(300.0)), Ok(sample(90.0)), Ok(sample(200.0))]);
        let outcome = gate().acquire(&mut readings).await.unwrap();
        assert!(!outcome.is_precise());
        assert_eq!(outcome.sample().accuracy_m, 90.0);
    }

    #[tokio::test]
    async fn test_permission_denied_aborts_even_with_samples() {
        let mut readings = stream::iter(vec![
            Ok(sample(90.0)),
            Err(SourceError::PermissionDenied),
            Ok(sample(5.0)),
        ]);
        let err = gate().acquire(&mut readings).await.unwrap_err();
        assert_eq!(err, LocationError::PermissionDenied);
        assert!(!err.is_recoverable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_source_times_out_with_no_signal() {
        let mut readings = stream::pending::<Result<PositionSample, SourceError>>();
        let err = gate().acquire(&mut readings).await.unwrap_err();
        assert_eq!(err, LocationError::NoSignal(Duration::from_secs(20)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_tiers_map_to_config_thresholds() {
        let tiers = AccuracyTiers::default();
        assert_eq!(AccuracyTier::Matching.threshold_m(&tiers), 50.0);
        assert_eq!(AccuracyTier::GoOnline.threshold_m(&tiers), 150.0);
    }
}
