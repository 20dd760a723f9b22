//! # Configuration
//!
//! Layered, serde-backed configuration. Every section carries defaults so an empty
//! source set still yields a runnable (development) configuration. See
//! [`ConfigLoader`] for source precedence.

pub mod circuit_breaker;
pub mod error;
pub mod loader;

pub use circuit_breaker::{
    CircuitBreakerComponentConfig, CircuitBreakerComponentOverride, CircuitBreakerConfig,
};
pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::test_names;
use crate::messaging::ReconnectStrategy;

/// Root configuration for a recruitment platform service
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RecruitConfig {
    pub environment: String,
    pub broker: BrokerConfig,
    pub peer_service: PeerServiceConfig,
    pub circuit_breakers: CircuitBreakerConfig,
    pub cache: CacheConfig,
    pub coordination: CoordinationConfig,
    pub orchestration: OrchestrationConfig,
}

impl RecruitConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.broker.url.trim().is_empty() && self.broker.provider == BrokerProviderKind::RabbitMq {
            return Err(ConfigurationError::missing_required_field(
                "url",
                "broker configuration",
            ));
        }
        if self.peer_service.base_url.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "base_url",
                "peer_service configuration",
            ));
        }
        if self.peer_service.request_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "peer_service.request_timeout_ms",
                0,
                "must be greater than 0",
            ));
        }
        if self.cache.ttl_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache.ttl_seconds",
                0,
                "must be greater than 0",
            ));
        }
        if self.coordination.reference_wait_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "coordination.reference_wait_ms",
                0,
                "must be greater than 0",
            ));
        }
        if self.coordination.reference_ttl_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "coordination.reference_ttl_seconds",
                0,
                "must be greater than 0",
            ));
        }
        if self.orchestration.max_concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestration.max_concurrency",
                0,
                "must be greater than 0",
            ));
        }
        self.broker.reconnect.validate()?;
        self.circuit_breakers.validate()
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Which broker implementation backs the connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerProviderKind {
    #[serde(rename = "rabbitmq")]
    RabbitMq,
    InMemory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub provider: BrokerProviderKind,
    pub url: String,
    pub connection_name: String,
    pub prefetch_count: u16,
    pub reconnect: ReconnectConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            provider: BrokerProviderKind::RabbitMq,
            url: "amqp://localhost:5672".to_string(),
            connection_name: "recruit-core".to_string(),
            prefetch_count: 10,
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectStrategyKind {
    /// Reconnect in the background with bounded exponential backoff
    EagerBackoff,
    /// Stay disconnected until the next publish or consume
    OnNextUse,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub strategy: ReconnectStrategyKind,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// 0 means keep trying until shutdown
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            strategy: ReconnectStrategyKind::EagerBackoff,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    pub fn to_strategy(&self) -> ReconnectStrategy {
        match self.strategy {
            ReconnectStrategyKind::OnNextUse => ReconnectStrategy::OnNextUse,
            ReconnectStrategyKind::EagerBackoff => ReconnectStrategy::EagerBackoff {
                initial: Duration::from_millis(self.initial_backoff_ms),
                max: Duration::from_millis(self.max_backoff_ms),
                max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
            },
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.strategy == ReconnectStrategyKind::EagerBackoff {
            if self.initial_backoff_ms == 0 {
                return Err(ConfigurationError::invalid_value(
                    "broker.reconnect.initial_backoff_ms",
                    0,
                    "must be greater than 0",
                ));
            }
            if self.max_backoff_ms < self.initial_backoff_ms {
                return Err(ConfigurationError::invalid_value(
                    "broker.reconnect.max_backoff_ms",
                    self.max_backoff_ms,
                    "must not be lower than initial_backoff_ms",
                ));
            }
        }
        Ok(())
    }
}

/// User management service reached over HTTP
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PeerServiceConfig {
    pub base_url: String,
    pub service_token: String,
    pub request_timeout_ms: u64,
}

impl Default for PeerServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001/api/users".to_string(),
            service_token: String::new(),
            request_timeout_ms: 5_000,
        }
    }
}

impl PeerServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_seconds: 1_800 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Upper bound on how long a reference-data request waits for its reply
    pub reference_wait_ms: u64,
    /// Age after which cached reference data is refreshed before use
    pub reference_ttl_seconds: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            reference_wait_ms: 2_000,
            reference_ttl_seconds: 300,
        }
    }
}

impl CoordinationConfig {
    pub fn reference_wait(&self) -> Duration {
        Duration::from_millis(self.reference_wait_ms)
    }

    pub fn reference_ttl(&self) -> Duration {
        Duration::from_secs(self.reference_ttl_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub max_concurrency: usize,
    pub low_level_test: String,
    pub high_level_test: String,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            low_level_test: test_names::LOW_LEVEL.to_string(),
            high_level_test: test_names::HIGH_LEVEL.to_string(),
        }
    }
}
