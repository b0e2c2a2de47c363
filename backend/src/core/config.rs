//! Configuration for the withdrawal core
//!
//! All tunables live in [`CoreConfig`]. Every field has a default, so a
//! JSON file only needs to name what it overrides:
//!
//! ```json
//! { "commission_bps": 150, "sync": { "status_poll_ms": 2000 } }
//! ```

use crate::geo::TravelMode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Horizontal accuracy thresholds used by the location gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccuracyTiers {
    /// Threshold for creating and matching requests (meters)
    pub matching_m: f64,
    /// Relaxed threshold for an agent going online (meters)
    pub go_online_m: f64,
}

impl Default for AccuracyTiers {
    fn default() -> Self {
        Self {
            matching_m: 50.0,
            go_online_m: 150.0,
        }
    }
}

/// Poll intervals of the synchronization loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub status_poll_ms: u64,
    pub position_poll_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            status_poll_ms: 3_000,
            position_poll_ms: 2_000,
        }
    }
}

impl SyncConfig {
    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_ms)
    }

    pub fn position_poll_interval(&self) -> Duration {
        Duration::from_millis(self.position_poll_ms)
    }
}

/// Position smoothing and marker animation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// EMA weight given to each new sample, in (0, 1]
    pub smoothing_alpha: f64,
    /// Movements shorter than this are not animated (meters)
    pub jitter_threshold_m: f64,
    /// Animation time per meter of jump
    pub animation_ms_per_meter: f64,
    pub min_animation_ms: u64,
    pub max_animation_ms: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: 0.35,
            jitter_threshold_m: 2.0,
            animation_ms_per_meter: 25.0,
            min_animation_ms: 300,
            max_animation_ms: 2_000,
        }
    }
}

/// Complete core configuration
///
/// # Example
/// ```
/// use cash_courier_core_rs::CoreConfig;
///
/// let config = CoreConfig::from_json_str(r#"{ "commission_bps": 200 }"#).unwrap();
/// assert_eq!(config.commission_bps, 200);
/// assert_eq!(config.min_amount, 10); // untouched fields keep defaults
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Smallest withdrawal accepted (currency units)
    pub min_amount: i64,
    /// Largest withdrawal accepted (currency units)
    pub max_amount: i64,
    /// Agent commission on top of the amount, in basis points
    pub commission_bps: i64,
    /// How long a request may stay pending before it expires
    pub request_expiry_secs: i64,
    /// Presence older than this is not eligible for matching
    pub presence_freshness_secs: i64,
    pub accuracy: AccuracyTiers,
    /// Hard wall-clock limit of the location gate
    pub gate_max_wait_ms: u64,
    /// Budget for a single routing call before ETA is dropped
    pub routing_timeout_ms: u64,
    pub travel_mode: TravelMode,
    /// Interval of the passive directory scan when no agent is found
    pub scan_interval_ms: u64,
    /// Default search radius for nearby agents
    pub search_radius_km: f64,
    pub sync: SyncConfig,
    pub tracking: TrackingConfig,
    /// Events the service keeps before evicting the oldest
    pub event_retention: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            min_amount: 10,
            max_amount: 100_000,
            commission_bps: 100,
            request_expiry_secs: 15 * 60,
            presence_freshness_secs: 60,
            accuracy: AccuracyTiers::default(),
            gate_max_wait_ms: 20_000,
            routing_timeout_ms: 3_000,
            travel_mode: TravelMode::Walking,
            scan_interval_ms: 5_000,
            search_radius_km: 2.0,
            sync: SyncConfig::default(),
            tracking: TrackingConfig::default(),
            event_retention: 10_000,
        }
    }
}

impl CoreConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Check every parameter is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_amount <= 0 {
            return Err(ConfigError::Invalid("min_amount must be > 0".to_string()));
        }
        if self.max_amount < self.min_amount {
            return Err(ConfigError::Invalid(
                "max_amount must be >= min_amount".to_string(),
            ));
        }
        if !(0..=10_000).contains(&self.commission_bps) {
            return Err(ConfigError::Invalid(
                "commission_bps must be within 0..=10000".to_string(),
            ));
        }
        if self.request_expiry_secs <= 0 {
            return Err(ConfigError::Invalid(
                "request_expiry_secs must be > 0".to_string(),
            ));
        }
        if self.presence_freshness_secs <= 0 {
            return Err(ConfigError::Invalid(
                "presence_freshness_secs must be > 0".to_string(),
            ));
        }
        if !(self.accuracy.matching_m > 0.0 && self.accuracy.go_online_m >= self.accuracy.matching_m) {
            return Err(ConfigError::Invalid(
                "accuracy tiers must satisfy 0 < matching_m <= go_online_m".to_string(),
            ));
        }
        if self.gate_max_wait_ms == 0 || self.routing_timeout_ms == 0 || self.scan_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "gate, routing and scan durations must be > 0".to_string(),
            ));
        }
        if !(self.search_radius_km > 0.0) {
            return Err(ConfigError::Invalid(
                "search_radius_km must be > 0".to_string(),
            ));
        }
        if self.sync.status_poll_ms == 0 || self.sync.position_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll intervals must be > 0".to_string(),
            ));
        }
        let alpha = self.tracking.smoothing_alpha;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ConfigError::Invalid(
                "smoothing_alpha must be within (0, 1]".to_string(),
            ));
        }
        if self.event_retention == 0 {
            return Err(ConfigError::Invalid(
                "event_retention must be > 0".to_string(),
            ));
        }
        if self.tracking.jitter_threshold_m < 0.0
            || self.tracking.animation_ms_per_meter < 0.0
            || self.tracking.min_animation_ms > self.tracking.max_animation_ms
        {
            return Err(ConfigError::Invalid(
                "tracking animation parameters are inconsistent".to_string(),
            ));
        }
        Ok(())
    }

    /// SHA256 of the canonical JSON form
    ///
    /// Checkpoints carry this so a snapshot is only restored under the
    /// configuration that produced it.
    pub fn fingerprint(&self) -> Result<String, ConfigError> {
        let json = serde_json::to_string(self)?;
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub fn request_expiry(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.request_expiry_secs)
    }

    pub fn presence_freshness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.presence_freshness_secs)
    }

    pub fn gate_max_wait(&self) -> Duration {
        Duration::from_millis(self.gate_max_wait_ms)
    }

    pub fn routing_timeout(&self) -> Duration {
        Duration::from_millis(self.routing_timeout_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    /// Commission owed to the agent for `amount`, rounded down
    pub fn commission_for(&self, amount: i64) -> i64 {
        amount * self.commission_bps / 10_000
    }
}
