//! # Circuit Breaker Manager
//!
//! Process-wide registry of breakers, one per named outbound operation. Breakers are
//! created on first use from the per-operation configuration and live for the rest
//! of the process.

use crate::config::CircuitBreakerConfig;
use crate::resilience::{CircuitBreaker, CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug)]
pub struct CircuitBreakerManager {
    circuit_breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerManager {
    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        info!(
            enabled = config.enabled,
            component_overrides = config.component_configs.len(),
            "Initializing circuit breaker manager"
        );

        Self {
            circuit_breakers: Arc::new(RwLock::new(HashMap::new())),
            config: config.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Get or create the circuit breaker for an operation
    pub async fn get_circuit_breaker(&self, component_name: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.circuit_breakers.read().await;
            if let Some(breaker) = breakers.get(component_name) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = self.circuit_breakers.write().await;

        // Double-check pattern (another task might have created it)
        if let Some(breaker) = breakers.get(component_name) {
            return Arc::clone(breaker);
        }

        let component_config = self
            .config
            .config_for_component(component_name)
            .to_resilience_config();

        let breaker = Arc::new(CircuitBreaker::new(component_name, component_config));
        breakers.insert(component_name.to_string(), Arc::clone(&breaker));

        info!(
            component = component_name,
            total_circuit_breakers = breakers.len(),
            "Created new circuit breaker"
        );

        breaker
    }

    pub async fn list_components(&self) -> Vec<String> {
        let breakers = self.circuit_breakers.read().await;
        breakers.keys().cloned().collect()
    }

    pub async fn get_component_metrics(&self, component_name: &str) -> Option<CircuitBreakerMetrics> {
        let breakers = self.circuit_breakers.read().await;
        breakers.get(component_name).map(|breaker| breaker.metrics())
    }

    pub async fn get_system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let breakers = self.circuit_breakers.read().await;
        SystemCircuitBreakerMetrics::collect(breakers.values().map(|breaker| breaker.metrics()))
    }

    /// Force open all circuit breakers (emergency stop)
    pub async fn force_open_all(&self) {
        warn!("🚨 Forcing all circuit breakers open (emergency stop)");

        let breakers = self.circuit_breakers.read().await;
        for breaker in breakers.values() {
            breaker.force_open();
        }
    }

    /// Force close all circuit breakers (emergency recovery)
    pub async fn force_close_all(&self) {
        warn!("🚨 Forcing all circuit breakers closed (emergency recovery)");

        let breakers = self.circuit_breakers.read().await;
        for breaker in breakers.values() {
            breaker.force_closed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerComponentOverride;
    use crate::resilience::CircuitState;
    use std::time::Duration;

    #[tokio::test]
    async fn test_breakers_are_created_once_per_component() {
        let manager = CircuitBreakerManager::from_config(&CircuitBreakerConfig::default());

        let first = manager.get_circuit_breaker("get_user_by_email").await;
        let second = manager.get_circuit_breaker("get_user_by_email").await;
        assert!(Arc::ptr_eq(&first, &second));

        let _ = manager.get_circuit_breaker("validate_credentials").await;
        let mut components = manager.list_components().await;
        components.sort();
        assert_eq!(components, vec!["get_user_by_email", "validate_credentials"]);
    }

    #[tokio::test]
    async fn test_component_overrides_applied() {
        let mut config = CircuitBreakerConfig::default();
        config.component_configs.insert(
            "slow_peer".to_string(),
            CircuitBreakerComponentOverride {
                timeout_ms: Some(7_500),
                ..Default::default()
            },
        );
        let manager = CircuitBreakerManager::from_config(&config);

        let breaker = manager.get_circuit_breaker("slow_peer").await;
        assert_eq!(breaker.config().call_timeout, Duration::from_millis(7_500));

        let credentials = manager.get_circuit_breaker("validate_credentials").await;
        assert_eq!(credentials.config().reset_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_force_all_and_system_metrics() {
        let manager = CircuitBreakerManager::from_config(&CircuitBreakerConfig::default());
        let a = manager.get_circuit_breaker("a").await;
        let b = manager.get_circuit_breaker("b").await;

        manager.force_open_all().await;
        assert_eq!(a.state(), CircuitState::Open);
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(manager.get_system_metrics().await.health_score(), 0.0);

        manager.force_close_all().await;
        assert_eq!(a.state(), CircuitState::Closed);
        assert!(manager.get_component_metrics("a").await.is_some());
        assert!(manager.get_component_metrics("missing").await.is_none());
    }
}
