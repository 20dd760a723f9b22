//! # Crate Error Types
//!
//! Top-level error that the service binary and [`crate::context::ServiceContext`]
//! surface. Module errors convert into it with `?`.

use crate::config::ConfigurationError;
use crate::gateway::GatewayError;
use crate::messaging::MessagingError;
use crate::orchestration::OrchestrationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
