//! # Resilience
//!
//! Circuit breakers guarding synchronous outbound calls, plus the registry that owns
//! one breaker per named operation.

pub mod circuit_breaker;
pub mod config;
pub mod manager;
pub mod metrics;
pub mod rolling_window;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitState, FailureClassification, StateTransition,
};
pub use config::CircuitBreakerConfig;
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
pub use rolling_window::{RollingWindow, WindowStats};
