//! Breaker-protected execution of outbound operations.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use super::classification::CallError;
use crate::resilience::{CircuitBreakerError, CircuitBreakerManager};

/// Outcome taxonomy surfaced to callers of the gateway
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The peer refused the request; never counted against the breaker
    #[error("{operation} rejected ({status}): {message}")]
    Client {
        operation: String,
        status: u16,
        message: String,
    },

    /// The peer failed or could not be reached; the caller decides whether to retry
    #[error("{operation} failed: {message}")]
    Provider { operation: String, message: String },

    /// The breaker for this operation is open; nothing was attempted
    #[error("{operation} unavailable: circuit open")]
    Unavailable { operation: String },

    /// The client could not be constructed or a request could not be built
    #[error("gateway configuration error: {0}")]
    Configuration(String),
}

impl GatewayError {
    fn from_call(operation: &str, error: CallError) -> Self {
        match error {
            CallError::Client { status, message } => Self::Client {
                operation: operation.to_string(),
                status,
                message,
            },
            CallError::Provider { message, .. } => Self::Provider {
                operation: operation.to_string(),
                message,
            },
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Wraps outbound operations with the per-operation circuit breaker.
///
/// The gateway never retries. Open circuits fail fast with
/// [`GatewayError::Unavailable`] without invoking the operation.
#[derive(Debug, Clone)]
pub struct ResilientGateway {
    breakers: Arc<CircuitBreakerManager>,
}

impl ResilientGateway {
    pub fn new(breakers: Arc<CircuitBreakerManager>) -> Self {
        Self { breakers }
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.breakers
    }

    pub async fn call<F, Fut, T>(&self, operation: &str, f: F) -> Result<T, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        if !self.breakers.is_enabled() {
            return f().await.map_err(|e| GatewayError::from_call(operation, e));
        }

        let breaker = self.breakers.get_circuit_breaker(operation).await;
        match breaker.call(f).await {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::CircuitOpen { .. }) => {
                warn!(operation, "Fallback: circuit open, peer treated as unavailable");
                Err(GatewayError::Unavailable {
                    operation: operation.to_string(),
                })
            }
            Err(CircuitBreakerError::Timeout { timeout, .. }) => Err(GatewayError::Provider {
                operation: operation.to_string(),
                message: format!("timed out after {}ms", timeout.as_millis()),
            }),
            Err(CircuitBreakerError::OperationFailed(error)) => {
                debug!(operation, error = %error, "Outbound operation failed");
                Err(GatewayError::from_call(operation, error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use crate::resilience::CircuitState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn gateway() -> ResilientGateway {
        ResilientGateway::new(Arc::new(CircuitBreakerManager::from_config(
            &CircuitBreakerConfig::default(),
        )))
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_taxonomy() {
        let gateway = gateway();

        let client = gateway
            .call("lookup", || async { Err::<(), _>(CallError::client(401, "bad token")) })
            .await;
        assert!(matches!(client, Err(GatewayError::Client { status: 401, .. })));

        let provider = gateway
            .call("lookup", || async { Err::<(), _>(CallError::provider("refused")) })
            .await;
        assert!(matches!(provider, Err(GatewayError::Provider { .. })));

        // The provider failure opened the circuit (100% >= 50%)
        let invoked = AtomicUsize::new(0);
        let unavailable = gateway
            .call("lookup", || async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(unavailable.unwrap_err().is_unavailable());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_have_independent_breakers() {
        let gateway = gateway();

        let _ = gateway
            .call("flaky", || async { Err::<(), _>(CallError::provider("down")) })
            .await;
        let healthy = gateway.call("healthy", || async { Ok::<_, CallError>(7) }).await;

        assert_eq!(healthy.unwrap(), 7);
        let flaky = gateway.breakers().get_circuit_breaker("flaky").await;
        assert_eq!(flaky.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_disabled_breakers_pass_through() {
        let config = CircuitBreakerConfig {
            enabled: false,
            ..Default::default()
        };
        let gateway = ResilientGateway::new(Arc::new(CircuitBreakerManager::from_config(&config)));

        for _ in 0..5 {
            let result = gateway
                .call("any", || async { Err::<(), _>(CallError::provider("down")) })
                .await;
            assert!(matches!(result, Err(GatewayError::Provider { .. })));
        }
        assert!(gateway.breakers().list_components().await.is_empty());
    }
}
