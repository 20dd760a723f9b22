//! # Circuit Breaker Configuration
//!
//! Duration-based settings for a single breaker. The TOML-facing, millisecond-based
//! form lives in `crate::config::CircuitBreakerComponentConfig` and converts into this.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Calls running longer than this are abandoned and count as provider failures
    pub call_timeout: Duration,

    /// Rolling error rate (0-100) at or above which the circuit opens
    pub error_threshold_percentage: u8,

    /// Time to stay open before a single trial call is let through
    pub reset_timeout: Duration,

    /// Length of the rolling statistics window
    pub rolling_window: Duration,

    /// Number of buckets the window is divided into
    pub rolling_buckets: u32,

    /// Minimum number of samples in the window before the error rate can open the circuit
    pub volume_threshold: u32,
}

impl CircuitBreakerConfig {
    /// Width of a single window bucket
    pub fn bucket_width(&self) -> Duration {
        self.rolling_window / self.rolling_buckets.max(1)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.call_timeout.is_zero() {
            return Err("call_timeout must be greater than 0".to_string());
        }

        if self.error_threshold_percentage == 0 || self.error_threshold_percentage > 100 {
            return Err("error_threshold_percentage must be between 1 and 100".to_string());
        }

        if self.reset_timeout.is_zero() {
            return Err("reset_timeout must be greater than 0".to_string());
        }

        if self.rolling_buckets == 0 {
            return Err("rolling_buckets must be greater than 0".to_string());
        }

        if self.rolling_window < Duration::from_millis(self.rolling_buckets as u64) {
            return Err("rolling_window must allow at least 1ms per bucket".to_string());
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(1),
            error_threshold_percentage: 50,
            reset_timeout: Duration::from_secs(3),
            rolling_window: Duration::from_secs(10),
            rolling_buckets: 10,
            volume_threshold: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_config_validation() {
        let valid_config = CircuitBreakerConfig::default();
        assert!(valid_config.validate().is_ok());

        let mut invalid_config = CircuitBreakerConfig {
            error_threshold_percentage: 0,
            ..Default::default()
        };
        assert!(invalid_config.validate().is_err());

        invalid_config = CircuitBreakerConfig {
            error_threshold_percentage: 101,
            ..Default::default()
        };
        assert!(invalid_config.validate().is_err());

        invalid_config = CircuitBreakerConfig {
            reset_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(invalid_config.validate().is_err());

        invalid_config = CircuitBreakerConfig {
            rolling_buckets: 0,
            ..Default::default()
        };
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_bucket_width() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.bucket_width(), Duration::from_secs(1));
    }
}
