use serde::Serialize;
use tracing::debug;

use crate::messaging::{ConnectionManager, MessagingError};

/// Publishes typed events as persistent JSON messages
#[derive(Debug, Clone)]
pub struct EventPublisher {
    connection: ConnectionManager,
}

impl EventPublisher {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub async fn publish_event<T: Serialize + ?Sized>(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &T,
    ) -> Result<(), MessagingError> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| MessagingError::message_serialization(e.to_string()))?;
        self.connection.publish(exchange, routing_key, &payload).await?;
        debug!(exchange, routing_key, "Event published");
        Ok(())
    }
}
