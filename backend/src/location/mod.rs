//! Device location
//!
//! A [`LocationSource`] yields raw readings; [`LocationSubscription`] turns it
//! into a cancellable [`PositionStream`]; [`AccuracyGate`] consumes a stream
//! until a reading is good enough or the deadline passes.

pub mod gate;
pub mod subscription;

use crate::geo::Coordinate;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;

pub use gate::{AccuracyGate, AccuracyTier, GateOutcome};
pub use subscription::{LocationSubscription, PositionStream};

/// One device reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub coordinate: Coordinate,
    /// Reported uncertainty radius (meters), lower is better
    pub accuracy_m: f64,
    pub at: DateTime<Utc>,
}

impl PositionSample {
    pub fn new(coordinate: Coordinate, accuracy_m: f64, at: DateTime<Utc>) -> Self {
        Self {
            coordinate,
            accuracy_m,
            at,
        }
    }
}

/// Failure signalled by a location source
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SourceError {
    /// The user refused location access; never retried
    #[error("location permission denied")]
    PermissionDenied,

    /// A single reading failed; the source keeps going
    #[error("location reading unavailable: {0}")]
    Unavailable(String),
}

/// Errors of acquiring a position
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("No location signal within {0:?}")]
    NoSignal(Duration),
}

impl LocationError {
    /// Whether asking again may help
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LocationError::NoSignal(_))
    }
}

/// Stream of raw device readings
///
/// `None` means the source is exhausted.
#[async_trait]
pub trait LocationSource: Send {
    async fn next_reading(&mut self) -> Option<Result<PositionSample, SourceError>>;
}

/// Replays a fixed script of readings, each after its own delay
///
/// Used by the CLI and tests in place of a device.
#[derive(Debug, Default)]
pub struct ReplaySource {
    script: VecDeque<(Duration, Result<PositionSample, SourceError>)>,
}

impl ReplaySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reading delivered `delay` after the previous one
    pub fn then(mut self, delay: Duration, sample: PositionSample) -> Self {
        self.script.push_back((delay, Ok(sample)));
        self
    }

    /// Queue a failure delivered `delay` after the previous reading
    pub fn then_fail(mut self, delay: Duration, error: SourceError) -> Self {
        self.script.push_back((delay, Err(error)));
        self
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

#[async_trait]
impl LocationSource for ReplaySource {
    async fn next_reading(&mut self) -> Option<Result<PositionSample, SourceError>> {
        let (delay, reading) = self.script.pop_front()?;
        tokio::time::sleep(delay).await;
        Some(reading)
    }
}
