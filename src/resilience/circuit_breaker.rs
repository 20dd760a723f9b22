//! # Circuit Breaker Implementation
//!
//! Fault isolation for outbound calls. A breaker tracks call outcomes over a bucketed
//! rolling window and moves between three states:
//!
//! - **Closed**: calls run; the circuit opens when the window's error rate reaches
//!   the configured percentage.
//! - **Open**: calls fail fast without running until `reset_timeout` has elapsed.
//! - **HalfOpen**: exactly one trial call runs. Success closes the circuit, failure
//!   reopens it. Concurrent callers are rejected while the trial is in flight.
//!
//! Every call runs under `call_timeout`; a timeout counts as a failure. Errors the
//! caller classifies as not-the-provider's-fault (see [`FailureClassification`]) are
//! recorded as successes so they never trip the circuit.

use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics, RollingWindow};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const TRANSITION_CHANNEL_CAPACITY: usize = 64;

/// Lock-free counters for lifetime metrics
#[derive(Debug)]
struct AtomicCircuitBreakerMetrics {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    timeout_count: AtomicU64,
    rejected_count: AtomicU64,
    half_open_calls: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl AtomicCircuitBreakerMetrics {
    fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            timeout_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
            half_open_calls: AtomicU64::new(0),
            total_duration_nanos: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record_success(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    #[inline]
    fn record_failure(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }
}

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - a single trial call is allowed
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open, // Default to safest state
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// A state change, broadcast to subscribers and logged. Never raised as an error.
#[derive(Debug, Clone, Serialize)]
pub struct StateTransition {
    pub component: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
}

/// Decides whether an error counts against a breaker's error budget
pub trait FailureClassification {
    fn counts_as_failure(&self) -> bool;
}

impl FailureClassification for String {
    fn counts_as_failure(&self) -> bool {
        true
    }
}

impl FailureClassification for &str {
    fn counts_as_failure(&self) -> bool {
        true
    }
}

impl FailureClassification for std::io::Error {
    fn counts_as_failure(&self) -> bool {
        true
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open (or a half-open trial is in flight), call was not attempted
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Operation exceeded the per-call timeout and was abandoned
    #[error("Operation in {component} timed out after {timeout:?}")]
    Timeout { component: String, timeout: Duration },

    /// Operation ran and returned an error
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

struct TrialGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

struct CallPermit<'a> {
    trial: Option<TrialGuard<'a>>,
}

impl CallPermit<'_> {
    fn is_trial(&self) -> bool {
        self.trial.is_some()
    }
}

/// Rolling-window circuit breaker with atomic state management
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Operation name for logging and metrics
    name: String,

    state: AtomicU8,

    config: CircuitBreakerConfig,

    window: RollingWindow,

    /// When the circuit last opened; cleared on close
    opened_at: Mutex<Option<Instant>>,

    /// Set while the single half-open trial call is running
    trial_in_flight: AtomicBool,

    metrics: AtomicCircuitBreakerMetrics,

    transitions: broadcast::Sender<StateTransition>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            error_threshold_percentage = config.error_threshold_percentage,
            call_timeout_ms = config.call_timeout.as_millis() as u64,
            reset_timeout_ms = config.reset_timeout.as_millis() as u64,
            rolling_window_ms = config.rolling_window.as_millis() as u64,
            "Circuit breaker initialized"
        );

        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);

        Self {
            window: RollingWindow::new(config.rolling_window, config.rolling_buckets),
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            opened_at: Mutex::new(None),
            trial_in_flight: AtomicBool::new(false),
            metrics: AtomicCircuitBreakerMetrics::new(),
            transitions,
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Receive every subsequent state transition
    pub fn subscribe(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    /// Execute an operation with circuit breaker protection, classifying errors
    /// through [`FailureClassification`]
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: FailureClassification,
    {
        self.call_with(operation, E::counts_as_failure).await
    }

    /// Execute an operation with an explicit failure classifier
    pub async fn call_with<F, Fut, T, E, C>(
        &self,
        operation: F,
        counts_as_failure: C,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> bool,
    {
        let Some(permit) = self.try_acquire() else {
            self.metrics.rejected_count.fetch_add(1, Ordering::Relaxed);
            debug!(component = %self.name, "Call rejected, circuit open");
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
            });
        };

        if permit.is_trial() {
            self.metrics.half_open_calls.fetch_add(1, Ordering::Relaxed);
            debug!(component = %self.name, "Running half-open trial call");
        }

        let start = Instant::now();
        let outcome = tokio::time::timeout(self.config.call_timeout, operation()).await;
        let duration = start.elapsed();

        match outcome {
            Ok(Ok(value)) => {
                self.record_success(&permit, duration);
                Ok(value)
            }
            Ok(Err(error)) => {
                if counts_as_failure(&error) {
                    self.record_failure(&permit, duration);
                } else {
                    self.record_success(&permit, duration);
                }
                Err(CircuitBreakerError::OperationFailed(error))
            }
            Err(_) => {
                self.metrics.timeout_count.fetch_add(1, Ordering::Relaxed);
                warn!(
                    component = %self.name,
                    timeout_ms = self.config.call_timeout.as_millis() as u64,
                    "Operation timed out"
                );
                self.record_failure(&permit, duration);
                Err(CircuitBreakerError::Timeout {
                    component: self.name.clone(),
                    timeout: self.config.call_timeout,
                })
            }
        }
    }

    fn try_acquire(&self) -> Option<CallPermit<'_>> {
        loop {
            match self.state() {
                CircuitState::Closed => return Some(CallPermit { trial: None }),
                CircuitState::Open => {
                    if !self.reset_timeout_elapsed() {
                        return None;
                    }
                    // Losing this race is fine, re-read and act on the winner's state
                    self.compare_and_transition(CircuitState::Open, CircuitState::HalfOpen);
                }
                CircuitState::HalfOpen => {
                    return self
                        .trial_in_flight
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .ok()
                        .map(|_| CallPermit {
                            trial: Some(TrialGuard {
                                flag: &self.trial_in_flight,
                            }),
                        });
                }
            }
        }
    }

    fn reset_timeout_elapsed(&self) -> bool {
        match *self.opened_at.lock() {
            Some(opened_at) => opened_at.elapsed() >= self.config.reset_timeout,
            None => {
                warn!(component = %self.name, "Circuit open but no timestamp recorded");
                true
            }
        }
    }

    fn record_success(&self, permit: &CallPermit<'_>, duration: Duration) {
        self.metrics.record_success(duration);

        if permit.is_trial() {
            if self.compare_and_transition(CircuitState::HalfOpen, CircuitState::Closed) {
                self.window.reset();
                *self.opened_at.lock() = None;
            }
            return;
        }

        if self.state() == CircuitState::Closed {
            self.window.record_success();
        }
    }

    fn record_failure(&self, permit: &CallPermit<'_>, duration: Duration) {
        self.metrics.record_failure(duration);

        if permit.is_trial() {
            self.open_from(CircuitState::HalfOpen);
            return;
        }

        if self.state() != CircuitState::Closed {
            return;
        }

        self.window.record_failure();
        let stats = self.window.stats();
        if stats.total() >= self.config.volume_threshold as u64
            && stats.error_percentage() >= self.config.error_threshold_percentage as f64
        {
            self.open_from(CircuitState::Closed);
        }
    }

    fn open_from(&self, from: CircuitState) {
        *self.opened_at.lock() = Some(Instant::now());
        self.compare_and_transition(from, CircuitState::Open);
    }

    fn compare_and_transition(&self, from: CircuitState, to: CircuitState) -> bool {
        if self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.announce(from, to);
        true
    }

    fn announce(&self, from: CircuitState, to: CircuitState) {
        let stats = self.window.stats();
        match to {
            CircuitState::Open => error!(
                component = %self.name,
                from = %from,
                window_failures = stats.failures,
                window_samples = stats.total(),
                error_threshold_percentage = self.config.error_threshold_percentage,
                reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                "Circuit breaker opened (failing fast)"
            ),
            CircuitState::HalfOpen => info!(
                component = %self.name,
                "Circuit breaker half-open (testing recovery)"
            ),
            CircuitState::Closed => info!(
                component = %self.name,
                from = %from,
                total_calls = self.metrics.total_calls.load(Ordering::Relaxed),
                "Circuit breaker closed (recovered)"
            ),
        }

        // No subscribers is the common case
        let _ = self.transitions.send(StateTransition {
            component: self.name.clone(),
            from,
            to,
            at: Utc::now(),
        });
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "Circuit breaker forced open");
        *self.opened_at.lock() = Some(Instant::now());
        let previous = CircuitState::from(self.state.swap(CircuitState::Open as u8, Ordering::AcqRel));
        if previous != CircuitState::Open {
            self.announce(previous, CircuitState::Open);
        }
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "Circuit breaker forced closed");
        self.window.reset();
        *self.opened_at.lock() = None;
        let previous =
            CircuitState::from(self.state.swap(CircuitState::Closed as u8, Ordering::AcqRel));
        if previous != CircuitState::Closed {
            self.announce(previous, CircuitState::Closed);
        }
    }

    /// Current counters and rolling-window error rate
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let total_calls = self.metrics.total_calls.load(Ordering::Relaxed);
        let total_duration_nanos = self.metrics.total_duration_nanos.load(Ordering::Relaxed);
        let window = self.window.stats();

        CircuitBreakerMetrics {
            state: self.state(),
            total_calls,
            success_count: self.metrics.success_count.load(Ordering::Relaxed),
            failure_count: self.metrics.failure_count.load(Ordering::Relaxed),
            timeout_count: self.metrics.timeout_count.load(Ordering::Relaxed),
            rejected_count: self.metrics.rejected_count.load(Ordering::Relaxed),
            half_open_calls: self.metrics.half_open_calls.load(Ordering::Relaxed),
            window_samples: window.total(),
            window_error_percentage: window.error_percentage(),
            average_duration: total_duration_nanos
                .checked_div(total_calls)
                .map(Duration::from_nanos)
                .unwrap_or_default(),
            ..CircuitBreakerMetrics::idle(self.name.as_str())
        }
    }

    /// Closed with a low rolling error rate
    pub fn is_healthy(&self) -> bool {
        self.state() == CircuitState::Closed && self.window.stats().error_percentage() < 10.0
    }
}
