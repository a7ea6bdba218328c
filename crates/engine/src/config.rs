//! Detector and aggregator tuning knobs.

use crate::EngineError;
use serde::{Deserialize, Serialize};

/// Thresholds for the four signal detectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorSettings {
    /// A pool counts as new while head − creation height is below this.
    pub new_pool_blocks: u64,
    /// Liquidity ratio that fires the spike detector (strictly greater).
    pub spike_multiplier: f64,
    /// The spike detector re-arms once the ratio falls below this.
    pub spike_rearm_multiplier: f64,
    /// Trailing blocks in the liquidity baseline moving average.
    pub baseline_blocks: usize,
    /// Fraction of pool liquidity a single swap must exceed (strictly).
    pub whale_fraction: f64,
    /// Sentiment score that fires the threshold detector (strictly greater).
    pub sentiment_threshold: f64,
    /// Pools below this liquidity never fire spike or whale signals.
    pub min_liquidity_usd: f64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            new_pool_blocks: 15,
            spike_multiplier: 5.0,
            spike_rearm_multiplier: 4.0,
            baseline_blocks: 30,
            whale_fraction: 0.005,
            sentiment_threshold: 0.6,
            min_liquidity_usd: 5000.0,
        }
    }
}

impl DetectorSettings {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.new_pool_blocks == 0 {
            return Err(EngineError::InvalidConfig(
                "new_pool_blocks must be at least 1".into(),
            ));
        }
        if self.spike_multiplier <= 1.0 || !self.spike_multiplier.is_finite() {
            return Err(EngineError::InvalidConfig(format!(
                "spike_multiplier must be a finite value above 1.0, got {}",
                self.spike_multiplier
            )));
        }
        if self.spike_rearm_multiplier >= self.spike_multiplier {
            return Err(EngineError::InvalidConfig(format!(
                "spike_rearm_multiplier {} must sit below spike_multiplier {}",
                self.spike_rearm_multiplier, self.spike_multiplier
            )));
        }
        if self.baseline_blocks == 0 {
            return Err(EngineError::InvalidConfig(
                "baseline_blocks must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.whale_fraction) || self.whale_fraction == 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "whale_fraction must be in (0, 1], got {}",
                self.whale_fraction
            )));
        }
        if !(-1.0..=1.0).contains(&self.sentiment_threshold) {
            return Err(EngineError::InvalidConfig(format!(
                "sentiment_threshold must be in [-1, 1], got {}",
                self.sentiment_threshold
            )));
        }
        if self.min_liquidity_usd < 0.0 || !self.min_liquidity_usd.is_finite() {
            return Err(EngineError::InvalidConfig(format!(
                "min_liquidity_usd must be non-negative, got {}",
                self.min_liquidity_usd
            )));
        }
        Ok(())
    }
}

/// Voting and lifecycle parameters for the strategy aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorSettings {
    /// Distinct signal kinds required to qualify (N of 4).
    pub signals_required: u8,
    /// Blocks a signal stays active after its detection block.
    pub horizon_blocks: u64,
    /// Seconds between background expiry sweeps.
    pub sweep_interval_secs: u64,
    /// Idle pools untouched for this long are evicted from memory.
    pub idle_eviction_secs: i64,
    /// Number of serialized per-pool processing lanes.
    pub lanes: usize,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            signals_required: 3,
            horizon_blocks: 50,
            sweep_interval_secs: 10,
            idle_eviction_secs: 3600,
            lanes: 8,
        }
    }
}

impl AggregatorSettings {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(1..=4).contains(&self.signals_required) {
            return Err(EngineError::InvalidConfig(format!(
                "signals_required must be between 1 and 4, got {}",
                self.signals_required
            )));
        }
        if self.horizon_blocks == 0 {
            return Err(EngineError::InvalidConfig(
                "horizon_blocks must be at least 1".into(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "sweep_interval_secs must be at least 1".into(),
            ));
        }
        if self.idle_eviction_secs <= 0 {
            return Err(EngineError::InvalidConfig(
                "idle_eviction_secs must be positive".into(),
            ));
        }
        if self.lanes == 0 {
            return Err(EngineError::InvalidConfig(
                "lanes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_defaults_are_valid() {
        let settings = DetectorSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.new_pool_blocks, 15);
        assert_eq!(settings.spike_multiplier, 5.0);
        assert_eq!(settings.whale_fraction, 0.005);
        assert_eq!(settings.sentiment_threshold, 0.6);
    }

    #[test]
    fn test_aggregator_defaults_are_valid() {
        let settings = AggregatorSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.signals_required, 3);
    }

    #[test]
    fn test_rearm_above_trigger_rejected() {
        let settings = DetectorSettings {
            spike_rearm_multiplier: 6.0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_signals_required_out_of_range_rejected() {
        let settings = AggregatorSettings {
            signals_required: 5,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = AggregatorSettings {
            signals_required: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
