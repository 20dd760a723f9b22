//! # Circuit Breaker Metrics
//!
//! Point-in-time snapshots of breaker activity. One snapshot per outbound
//! operation, collected by [`crate::resilience::CircuitBreakerManager`] into a
//! system view that the service logs on shutdown.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::resilience::CircuitState;

/// Rolling error percentage under which a closed breaker counts as healthy
const HEALTHY_ERROR_PERCENTAGE: f64 = 10.0;

/// Snapshot of one operation's breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerMetrics {
    pub operation: String,
    pub state: CircuitState,

    /// Calls that reached the wrapped operation
    pub total_calls: u64,
    /// Client errors are counted here too
    pub success_count: u64,
    /// Provider failures, timeouts included
    pub failure_count: u64,
    pub timeout_count: u64,
    /// Calls refused without running because the circuit was open
    pub rejected_count: u64,
    pub half_open_calls: u64,

    pub window_samples: u64,
    /// Error rate of the rolling window, 0 to 100
    pub window_error_percentage: f64,

    pub average_duration: Duration,
}

impl CircuitBreakerMetrics {
    /// A breaker that has not seen any traffic
    pub fn idle(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            state: CircuitState::Closed,
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            timeout_count: 0,
            rejected_count: 0,
            half_open_calls: 0,
            window_samples: 0,
            window_error_percentage: 0.0,
            average_duration: Duration::ZERO,
        }
    }

    /// Closed with a low rolling error rate. A half-open breaker is still
    /// recovering and does not count.
    pub fn is_healthy(&self) -> bool {
        self.state == CircuitState::Closed
            && self.window_error_percentage < HEALTHY_ERROR_PERCENTAGE
    }

    pub fn format_summary(&self) -> String {
        format!(
            "{}: {} | window {:.0}% errors over {} calls | lifetime {} calls, {} failures, {} timeouts, {} rejected | avg {}ms",
            self.operation,
            self.state,
            self.window_error_percentage,
            self.window_samples,
            self.total_calls,
            self.failure_count,
            self.timeout_count,
            self.rejected_count,
            self.average_duration.as_millis()
        )
    }
}

/// Snapshots of every breaker in the process, keyed by operation
#[derive(Debug, Clone, Serialize)]
pub struct SystemCircuitBreakerMetrics {
    pub operations: BTreeMap<String, CircuitBreakerMetrics>,
    pub collected_at: DateTime<Utc>,
}

impl SystemCircuitBreakerMetrics {
    pub fn collect(snapshots: impl IntoIterator<Item = CircuitBreakerMetrics>) -> Self {
        Self {
            operations: snapshots
                .into_iter()
                .map(|snapshot| (snapshot.operation.clone(), snapshot))
                .collect(),
            collected_at: Utc::now(),
        }
    }

    pub fn count_in(&self, state: CircuitState) -> usize {
        self.operations
            .values()
            .filter(|snapshot| snapshot.state == state)
            .count()
    }

    /// Operations whose breaker is currently refusing calls
    pub fn open_operations(&self) -> Vec<&str> {
        self.operations
            .values()
            .filter(|snapshot| snapshot.state == CircuitState::Open)
            .map(|snapshot| snapshot.operation.as_str())
            .collect()
    }

    /// Fraction of healthy breakers, 1.0 when none exist yet
    pub fn health_score(&self) -> f64 {
        if self.operations.is_empty() {
            return 1.0;
        }
        let healthy = self.operations.values().filter(|m| m.is_healthy()).count();
        healthy as f64 / self.operations.len() as f64
    }

    pub fn total_calls(&self) -> u64 {
        self.operations.values().map(|m| m.total_calls).sum()
    }

    pub fn total_rejections(&self) -> u64 {
        self.operations.values().map(|m| m.rejected_count).sum()
    }

    pub fn format_summary(&self) -> String {
        let mut summary = format!(
            "Circuit Breakers: {} total | {} closed | {} open | {} half-open | Health: {:.1}% | Rejected calls: {}",
            self.operations.len(),
            self.count_in(CircuitState::Closed),
            self.count_in(CircuitState::Open),
            self.count_in(CircuitState::HalfOpen),
            self.health_score() * 100.0,
            self.total_rejections()
        );
        let open = self.open_operations();
        if !open.is_empty() {
            summary.push_str(&format!(" | Open: {}", open.join(", ")));
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_summary_names_open_operations() {
        let empty = SystemCircuitBreakerMetrics::collect(Vec::new());
        assert_eq!(empty.health_score(), 1.0);
        assert!(empty.format_summary().starts_with("Circuit Breakers: 0 total"));

        let system = SystemCircuitBreakerMetrics::collect(vec![
            CircuitBreakerMetrics::idle("get_user_by_email"),
            CircuitBreakerMetrics {
                state: CircuitState::Open,
                rejected_count: 4,
                ..CircuitBreakerMetrics::idle("get_user_by_id")
            },
        ]);

        assert_eq!(system.health_score(), 0.5);
        assert_eq!(system.open_operations(), vec!["get_user_by_id"]);
        assert_eq!(system.total_rejections(), 4);
        let summary = system.format_summary();
        assert!(summary.contains("1 open"));
        assert!(summary.ends_with("Open: get_user_by_id"));
    }

    #[test]
    fn test_noisy_closed_breaker_is_unhealthy() {
        let noisy = CircuitBreakerMetrics {
            window_samples: 10,
            window_error_percentage: 30.0,
            ..CircuitBreakerMetrics::idle("validate_credentials")
        };
        assert!(!noisy.is_healthy());
        assert!(noisy
            .format_summary()
            .starts_with("validate_credentials: closed | window 30% errors over 10 calls"));
    }
}
