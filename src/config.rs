//! Dispatch configuration.
//!
//! Configuration is passed explicitly through every call; nothing here is
//! process-global. An admin surface that wants runtime-tunable weights swaps
//! a [`SharedConfig`] snapshot at request boundaries instead of mutating
//! shared state mid-flight.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{DEFAULT_AVG_SPEED_KPH, SERVICE_TIME_MIN};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug)]
pub enum ConfigError {
    /// Sub-score weights must sum to 1.0.
    WeightSum(f64),
    /// A weight fell outside [0, 1].
    WeightRange(&'static str, f64),
    NonPositive(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::WeightSum(sum) => {
                write!(f, "scoring weights must sum to 1.0, got {sum}")
            }
            ConfigError::WeightRange(name, value) => {
                write!(f, "weight {name} must be in [0, 1], got {value}")
            }
            ConfigError::NonPositive(name) => write!(f, "{name} must be positive"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Weights applied to the six sub-scores. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub distance: f64,
    pub capacity: f64,
    pub urgency: f64,
    pub compatibility: f64,
    pub performance: f64,
    pub interference: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            distance: 0.25,
            capacity: 0.15,
            urgency: 0.25,
            compatibility: 0.10,
            performance: 0.10,
            interference: 0.15,
        }
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let named = [
            ("distance", self.distance),
            ("capacity", self.capacity),
            ("urgency", self.urgency),
            ("compatibility", self.compatibility),
            ("performance", self.performance),
            ("interference", self.interference),
        ];
        for (name, value) in named {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::WeightRange(name, value));
            }
        }
        let sum: f64 = named.iter().map(|(_, v)| v).sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum(sum));
        }
        Ok(())
    }
}

/// Core configuration record, taken by the dispatcher on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub weights: ScoringWeights,
    /// Fixed per-stop service time in minutes.
    pub service_time_min: f64,
    /// Speed assumed for great-circle fallback estimates.
    pub fallback_speed_kph: f64,
    /// Fast mode evaluates feasibility only for this many candidates.
    pub fast_mode_candidates: usize,
    /// Stop counts up to this limit are sequenced exactly.
    pub exact_sequence_limit: usize,
    /// Wall-clock budget for one sequencing call.
    #[serde(with = "duration_secs")]
    pub sequencer_budget: Duration,
    /// Wall-clock budget for one single-order dispatch.
    #[serde(with = "duration_secs")]
    pub dispatch_budget: Duration,
    /// Wall-clock budget for one batch call.
    #[serde(with = "duration_secs")]
    pub batch_budget: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            service_time_min: SERVICE_TIME_MIN,
            fallback_speed_kph: DEFAULT_AVG_SPEED_KPH,
            fast_mode_candidates: 3,
            exact_sequence_limit: 8,
            sequencer_budget: Duration::from_secs(5),
            dispatch_budget: Duration::from_secs(30),
            batch_budget: Duration::from_secs(120),
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;
        if self.service_time_min < 0.0 {
            return Err(ConfigError::NonPositive("service_time_min"));
        }
        if self.fallback_speed_kph <= 0.0 {
            return Err(ConfigError::NonPositive("fallback_speed_kph"));
        }
        if self.fast_mode_candidates == 0 {
            return Err(ConfigError::NonPositive("fast_mode_candidates"));
        }
        if self.exact_sequence_limit == 0 {
            return Err(ConfigError::NonPositive("exact_sequence_limit"));
        }
        Ok(())
    }
}

/// Shared configuration handle for services that tune weights at runtime.
///
/// Readers take a snapshot per request; `replace` swaps the whole record so
/// no request ever observes a half-updated config.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig(Arc<RwLock<DispatchConfig>>);

impl SharedConfig {
    pub fn new(config: DispatchConfig) -> Self {
        Self(Arc::new(RwLock::new(config)))
    }

    pub fn snapshot(&self) -> DispatchConfig {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn replace(&self, config: DispatchConfig) -> Result<(), ConfigError> {
        config.validate()?;
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = config;
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be non-negative"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        ScoringWeights::default().validate().unwrap();
    }

    #[test]
    fn unbalanced_weights_rejected() {
        let weights = ScoringWeights {
            distance: 0.5,
            ..ScoringWeights::default()
        };
        assert!(matches!(
            weights.validate(),
            Err(ConfigError::WeightSum(_))
        ));
    }

    #[test]
    fn out_of_range_weight_rejected() {
        let weights = ScoringWeights {
            distance: -0.1,
            urgency: 0.60,
            ..ScoringWeights::default()
        };
        assert!(matches!(
            weights.validate(),
            Err(ConfigError::WeightRange("distance", _))
        ));
    }

    #[test]
    fn default_config_is_valid() {
        DispatchConfig::default().validate().unwrap();
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = DispatchConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: DispatchConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn shared_config_swaps_whole_record() {
        let shared = SharedConfig::default();
        let mut tuned = DispatchConfig::default();
        tuned.fast_mode_candidates = 5;
        shared.replace(tuned.clone()).unwrap();
        assert_eq!(shared.snapshot(), tuned);
    }

    #[test]
    fn shared_config_rejects_invalid_replacement() {
        let shared = SharedConfig::default();
        let mut broken = DispatchConfig::default();
        broken.weights.distance = 0.9;
        assert!(shared.replace(broken).is_err());
        assert_eq!(shared.snapshot(), DispatchConfig::default());
    }
}
