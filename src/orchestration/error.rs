use thiserror::Error;

use crate::gateway::GatewayError;
use crate::messaging::MessagingError;

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("Invalid user IDs: the batch is empty")]
    EmptyBatch,

    #[error("Status must be either \"approved\" or \"rejected\", got \"{0}\"")]
    InvalidOperation(String),

    #[error("No tests available. Cannot process assignments.")]
    NoTestsAvailable,

    #[error("Cannot connect to message broker. Please try again.")]
    BrokerUnavailable(#[source] MessagingError),

    #[error("Failed to fetch user data for {user_id}")]
    UserNotFound { user_id: String },

    #[error("Required test {name} not found in available tests")]
    UnknownTest { name: String },

    #[error("Selected test not found: {test_id}")]
    UnknownTestId { test_id: String },

    #[error("Invalid exam date '{0}'")]
    InvalidExamDate(String),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl OrchestrationError {
    pub fn user_not_found(user_id: impl Into<String>) -> Self {
        Self::UserNotFound {
            user_id: user_id.into(),
        }
    }
}
