//! Privacy-preserving timelock generator (§4.5).
//!
//! A fixed or uniformly sampled timelock pair leaks a protocol
//! fingerprint even when hashlocks differ across the two legs. This
//! draws each leg's offset from a CSPRNG-seeded capped log-normal
//! distribution, then rounds to a shared granularity so samples blend
//! into ecosystem-wide timelock traffic.

use crate::crypto::{round_up_to_multiple, sample_capped_log_normal};
use crate::error::{Error, Result, SwapError};

/// Per-leg sampling bounds.
#[derive(Debug, Clone, Copy)]
pub struct LegConfig {
    pub min_seconds: f64,
    pub median_seconds: f64,
    pub max_seconds: f64,
    pub sigma: f64,
}

impl LegConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sigma <= 0.0 {
            return Err(Error::Swap(SwapError::InvalidIntent(
                "timelock sigma must be > 0; a zero-sigma config produces a fixed delay and defeats the \
                 point of sampling"
                    .to_string(),
            )));
        }
        if !(self.min_seconds > 0.0 && self.min_seconds < self.max_seconds) {
            return Err(Error::Swap(SwapError::InvalidIntent(
                "timelock bounds must satisfy 0 < min < max".to_string(),
            )));
        }
        if !(self.min_seconds..=self.max_seconds).contains(&self.median_seconds) {
            return Err(Error::Swap(SwapError::InvalidIntent(
                "timelock median must lie within [min, max]".to_string(),
            )));
        }
        Ok(())
    }

    pub fn sample(&self) -> f64 {
        sample_capped_log_normal(self.median_seconds, self.sigma, self.min_seconds, self.max_seconds)
    }
}

/// Full timelock configuration for a swap: both legs, the inter-leg
/// buffer, and the rounding granularity.
#[derive(Debug, Clone, Copy)]
pub struct TimelockConfig {
    pub source: LegConfig,
    pub destination: LegConfig,
    pub inter_leg_buffer_seconds: f64,
    pub rounding_granularity_seconds: f64,
}

impl Default for TimelockConfig {
    fn default() -> Self {
        Self {
            source: LegConfig {
                min_seconds: 1800.0,
                median_seconds: 5400.0,
                max_seconds: 14400.0,
                sigma: 0.45,
            },
            destination: LegConfig {
                min_seconds: 900.0,
                median_seconds: 2700.0,
                max_seconds: 5400.0,
                sigma: 0.35,
            },
            inter_leg_buffer_seconds: 1800.0,
            rounding_granularity_seconds: 900.0,
        }
    }
}

impl TimelockConfig {
    /// Reject configurations that cannot produce a meaningful sample
    /// eagerly, rather than letting a degenerate distribution silently
    /// collapse timelocks to a single value at sampling time.
    pub fn validate(&self) -> Result<()> {
        self.source.validate()?;
        self.destination.validate()?;
        if self.inter_leg_buffer_seconds < 0.0 {
            return Err(Error::Swap(SwapError::InvalidIntent(
                "inter-leg buffer must be >= 0".to_string(),
            )));
        }
        if self.rounding_granularity_seconds <= 0.0 {
            return Err(Error::Swap(SwapError::InvalidIntent(
                "rounding granularity must be > 0".to_string(),
            )));
        }
        Ok(())
    }
}

/// Absolute UNIX-second timelocks for both legs of a swap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelockPair {
    pub source_expiry: i64,
    pub destination_expiry: i64,
}

/// Jointly sample a timelock pair: destination first, then source
/// enforced to be at least `destination + buffer` ahead (the refund path
/// on the source leg must always outlive the destination leg's).
pub fn sample_timelock_pair(config: &TimelockConfig, now: i64) -> Result<TimelockPair> {
    config.validate()?;

    let destination_offset = round_up_to_multiple(
        config.destination.sample(),
        config.rounding_granularity_seconds,
    );
    let source_sample = config.source.sample();
    let source_offset = round_up_to_multiple(
        source_sample.max(destination_offset + config.inter_leg_buffer_seconds),
        config.rounding_granularity_seconds,
    );

    Ok(TimelockPair {
        source_expiry: now + source_offset as i64,
        destination_expiry: now + destination_offset as i64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sigma_is_rejected_eagerly() {
        let mut config = TimelockConfig::default();
        config.source.sigma = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn source_always_outlives_destination_by_at_least_the_buffer() {
        let config = TimelockConfig::default();
        for _ in 0..200 {
            let pair = sample_timelock_pair(&config, 1_700_000_000).unwrap();
            assert!(
                pair.source_expiry
                    >= pair.destination_expiry + config.inter_leg_buffer_seconds as i64
            );
        }
    }

    #[test]
    fn offsets_are_rounded_to_granularity() {
        let config = TimelockConfig::default();
        for _ in 0..200 {
            let pair = sample_timelock_pair(&config, 1_700_000_000).unwrap();
            assert_eq!((pair.source_expiry - 1_700_000_000) % 900, 0);
            assert_eq!((pair.destination_expiry - 1_700_000_000) % 900, 0);
        }
    }

    #[test]
    fn offsets_stay_within_configured_bounds_after_rounding() {
        let config = TimelockConfig::default();
        for _ in 0..200 {
            let pair = sample_timelock_pair(&config, 1_700_000_000).unwrap();
            let source_offset = pair.source_expiry - 1_700_000_000;
            assert!(source_offset <= config.source.max_seconds as i64 + 900);
        }
    }
}
