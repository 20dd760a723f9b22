//! # Messaging Error Types
//!
//! Structured errors for broker connectivity, topology, publishing and consuming.
//! The type is `Clone` so one connection failure can be handed to every caller
//! that was waiting on the same connection attempt.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Topology declaration failed for {entity}: {message}")]
    Topology { entity: String, message: String },

    #[error("Publish to {exchange}/{routing_key} failed: {message}")]
    Publish {
        exchange: String,
        routing_key: String,
        message: String,
    },

    #[error("Consume from {queue} failed: {message}")]
    Consume { queue: String, message: String },

    #[error("Message acknowledgement failed: {message}")]
    Acknowledgement { message: String },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Connection manager has been shut down")]
    Shutdown,
}

impl MessagingError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn topology(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Topology {
            entity: entity.into(),
            message: message.into(),
        }
    }

    pub fn publish(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Publish {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            message: message.into(),
        }
    }

    pub fn consume(queue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Consume {
            queue: queue.into(),
            message: message.into(),
        }
    }

    pub fn acknowledgement(message: impl Into<String>) -> Self {
        Self::Acknowledgement {
            message: message.into(),
        }
    }

    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    pub fn message_deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    /// Errors after which the cached connection must not be reused
    pub fn invalidates_connection(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Publish { .. } | Self::Protocol { .. }
        )
    }
}

impl From<lapin::Error> for MessagingError {
    fn from(error: lapin::Error) -> Self {
        Self::Protocol {
            message: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(error: serde_json::Error) -> Self {
        if error.is_data() || error.is_syntax() || error.is_eof() {
            Self::message_deserialization(error.to_string())
        } else {
            Self::message_serialization(error.to_string())
        }
    }
}
