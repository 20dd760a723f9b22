use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::error::{ConfigResult, ConfigurationError};
use crate::constants::operations;

/// Circuit breaker configuration with HashMap-based per-operation overrides
///
/// Each outbound operation gets its own breaker. Operations without an entry in
/// `component_configs` use `default_config`; an entry only names the fields it
/// changes and inherits the rest from `default_config`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Whether outbound calls are wrapped in circuit breakers at all
    pub enabled: bool,

    /// Default configuration for new circuit breakers
    pub default_config: CircuitBreakerComponentConfig,

    /// Per-operation overrides layered over `default_config`
    pub component_configs: HashMap<String, CircuitBreakerComponentOverride>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        let mut component_configs = HashMap::new();
        component_configs.insert(
            operations::VALIDATE_CREDENTIALS.to_string(),
            CircuitBreakerComponentOverride {
                timeout_ms: Some(3_000),
                reset_timeout_ms: Some(10_000),
                ..Default::default()
            },
        );
        component_configs.insert(
            operations::GET_USER_BY_ID.to_string(),
            CircuitBreakerComponentOverride {
                timeout_ms: Some(3_000),
                ..Default::default()
            },
        );

        Self {
            enabled: true,
            default_config: CircuitBreakerComponentConfig::default(),
            component_configs,
        }
    }
}

impl CircuitBreakerConfig {
    /// Get configuration for a specific operation
    pub fn config_for_component(&self, component_name: &str) -> CircuitBreakerComponentConfig {
        match self.component_configs.get(component_name) {
            Some(overrides) => overrides.apply_to(&self.default_config),
            None => self.default_config.clone(),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.default_config.validate("circuit_breakers.default_config")?;
        for name in self.component_configs.keys() {
            self.config_for_component(name)
                .validate(&format!("circuit_breakers.component_configs.{name}"))?;
        }
        Ok(())
    }
}

/// Millisecond-based breaker settings as they appear in TOML and environment overrides
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerComponentConfig {
    /// Per-call timeout; a call running longer counts as a provider failure
    pub timeout_ms: u64,

    /// Rolling error rate (0-100) at or above which the breaker opens
    pub error_threshold_percentage: u8,

    /// Time spent Open before a single trial call is allowed
    pub reset_timeout_ms: u64,

    /// Duration of the rolling outcome window
    pub rolling_window_ms: u64,

    /// Number of buckets the rolling window is split into
    pub rolling_buckets: u32,

    /// Minimum samples in the window before the error rate is evaluated
    pub volume_threshold: u32,
}

impl Default for CircuitBreakerComponentConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1_000,
            error_threshold_percentage: 50,
            reset_timeout_ms: 3_000,
            rolling_window_ms: 10_000,
            rolling_buckets: 10,
            volume_threshold: 0,
        }
    }
}

/// Per-operation breaker settings. Unset fields come from `default_config`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerComponentOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_threshold_percentage: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolling_window_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolling_buckets: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_threshold: Option<u32>,
}

impl CircuitBreakerComponentOverride {
    pub fn apply_to(&self, base: &CircuitBreakerComponentConfig) -> CircuitBreakerComponentConfig {
        CircuitBreakerComponentConfig {
            timeout_ms: self.timeout_ms.unwrap_or(base.timeout_ms),
            error_threshold_percentage: self
                .error_threshold_percentage
                .unwrap_or(base.error_threshold_percentage),
            reset_timeout_ms: self.reset_timeout_ms.unwrap_or(base.reset_timeout_ms),
            rolling_window_ms: self.rolling_window_ms.unwrap_or(base.rolling_window_ms),
            rolling_buckets: self.rolling_buckets.unwrap_or(base.rolling_buckets),
            volume_threshold: self.volume_threshold.unwrap_or(base.volume_threshold),
        }
    }
}

impl CircuitBreakerComponentConfig {
    /// Convert to the resilience module's Duration-based format
    pub fn to_resilience_config(&self) -> crate::resilience::config::CircuitBreakerConfig {
        crate::resilience::config::CircuitBreakerConfig {
            call_timeout: Duration::from_millis(self.timeout_ms),
            error_threshold_percentage: self.error_threshold_percentage,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
            rolling_window: Duration::from_millis(self.rolling_window_ms),
            rolling_buckets: self.rolling_buckets,
            volume_threshold: self.volume_threshold,
        }
    }

    fn validate(&self, context: &str) -> ConfigResult<()> {
        self.to_resilience_config()
            .validate()
            .map_err(|reason| ConfigurationError::invalid_value(context, format!("{self:?}"), reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_lookup_falls_back_to_default() {
        let config = CircuitBreakerConfig::default();

        let credentials = config.config_for_component(operations::VALIDATE_CREDENTIALS);
        assert_eq!(credentials.timeout_ms, 3_000);
        assert_eq!(credentials.reset_timeout_ms, 10_000);

        let unknown = config.config_for_component("something_else");
        assert_eq!(unknown, CircuitBreakerComponentConfig::default());
    }

    #[test]
    fn test_component_entry_inherits_unset_fields_from_default_config() {
        let mut config = CircuitBreakerConfig::default();
        config.default_config.error_threshold_percentage = 30;
        config.default_config.volume_threshold = 5;

        let credentials = config.config_for_component(operations::VALIDATE_CREDENTIALS);
        assert_eq!(credentials.timeout_ms, 3_000);
        assert_eq!(credentials.error_threshold_percentage, 30);
        assert_eq!(credentials.volume_threshold, 5);
        assert_eq!(credentials.rolling_window_ms, 10_000);
    }

    #[test]
    fn test_conversion_to_resilience_config() {
        let converted = CircuitBreakerComponentConfig::default().to_resilience_config();
        assert_eq!(converted.call_timeout, Duration::from_secs(1));
        assert_eq!(converted.reset_timeout, Duration::from_secs(3));
        assert_eq!(converted.rolling_window, Duration::from_secs(10));
        assert_eq!(converted.rolling_buckets, 10);
    }

    #[test]
    fn test_validation_reports_offending_component() {
        let mut config = CircuitBreakerConfig::default();
        config.component_configs.insert(
            "broken".to_string(),
            CircuitBreakerComponentOverride {
                rolling_buckets: Some(0),
                ..Default::default()
            },
        );

        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("component_configs.broken"));
    }
}
