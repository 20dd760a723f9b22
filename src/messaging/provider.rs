//! # Broker Provider Enum
//!
//! Enum dispatch over the broker backends. The connection manager owns one
//! [`BrokerProvider`] and asks it for [`BrokerSession`]s; it never sees the
//! concrete client types.

use futures::stream::BoxStream;
use tokio::sync::watch;

use super::providers::in_memory::{InMemoryAcker, InMemoryBroker, InMemorySession};
use super::providers::rabbitmq::{RabbitMqBroker, RabbitMqSession};
use super::topology::Topology;
use super::MessagingError;
use crate::config::{BrokerConfig, BrokerProviderKind};

pub type DeliveryStream = BoxStream<'static, Result<Delivery, MessagingError>>;

/// Broker backend selected at startup
#[derive(Debug, Clone)]
pub enum BrokerProvider {
    /// AMQP 0.9.1 via lapin
    RabbitMq(RabbitMqBroker),

    /// Process-local broker for tests and development
    InMemory(InMemoryBroker),
}

impl BrokerProvider {
    pub fn from_config(config: &BrokerConfig) -> Self {
        match config.provider {
            BrokerProviderKind::RabbitMq => Self::RabbitMq(RabbitMqBroker::from_config(config)),
            BrokerProviderKind::InMemory => Self::InMemory(InMemoryBroker::new()),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::RabbitMq(_) => "rabbitmq",
            Self::InMemory(_) => "in_memory",
        }
    }

    pub async fn connect(&self) -> Result<BrokerSession, MessagingError> {
        match self {
            Self::RabbitMq(broker) => broker.connect().await.map(BrokerSession::RabbitMq),
            Self::InMemory(broker) => broker.connect().await.map(BrokerSession::InMemory),
        }
    }
}

/// One open broker connection with its channel
#[derive(Debug)]
pub enum BrokerSession {
    RabbitMq(RabbitMqSession),
    InMemory(InMemorySession),
}

impl BrokerSession {
    pub async fn declare_topology(&self, topology: &Topology) -> Result<(), MessagingError> {
        match self {
            Self::RabbitMq(session) => session.declare_topology(topology).await,
            Self::InMemory(session) => {
                session.declare_topology(topology)?;
                session.declare_confirmed().await;
                Ok(())
            }
        }
    }

    /// Persistent JSON publish
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), MessagingError> {
        match self {
            Self::RabbitMq(session) => session.publish(exchange, routing_key, payload).await,
            Self::InMemory(session) => session.publish(exchange, routing_key, payload),
        }
    }

    pub async fn consume(&self, queue: &str) -> Result<DeliveryStream, MessagingError> {
        match self {
            Self::RabbitMq(session) => session.consume(queue).await,
            Self::InMemory(session) => session.consume(queue),
        }
    }

    pub fn is_open(&self) -> bool {
        match self {
            Self::RabbitMq(session) => session.is_open(),
            Self::InMemory(session) => session.is_open(),
        }
    }

    /// Flips to `true` once the transport is gone
    pub fn close_signal(&self) -> watch::Receiver<bool> {
        match self {
            Self::RabbitMq(session) => session.close_signal(),
            Self::InMemory(session) => session.close_signal(),
        }
    }

    pub async fn close(&self) {
        match self {
            Self::RabbitMq(session) => session.close().await,
            Self::InMemory(session) => session.close(),
        }
    }
}

/// Message body and envelope as seen by handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub payload: Vec<u8>,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
}

impl InboundMessage {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, MessagingError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| MessagingError::message_deserialization(e.to_string()))
    }
}

/// A message received from a queue that still has to be settled
#[derive(Debug)]
pub struct Delivery {
    message: InboundMessage,
    acker: DeliveryAcker,
}

#[derive(Debug)]
pub enum DeliveryAcker {
    RabbitMq(lapin::acker::Acker),
    InMemory(InMemoryAcker),
}

impl Delivery {
    pub fn new(message: InboundMessage, acker: DeliveryAcker) -> Self {
        Self { message, acker }
    }

    pub fn message(&self) -> &InboundMessage {
        &self.message
    }

    pub fn into_parts(self) -> (InboundMessage, DeliveryAcker) {
        (self.message, self.acker)
    }
}

impl DeliveryAcker {
    pub async fn ack(self) -> Result<(), MessagingError> {
        match self {
            Self::RabbitMq(acker) => acker
                .ack(lapin::options::BasicAckOptions::default())
                .await
                .map(|_| ())
                .map_err(|e| MessagingError::acknowledgement(e.to_string())),
            Self::InMemory(acker) => {
                acker.ack();
                Ok(())
            }
        }
    }

    /// Reject without requeue; the broker dead-letters it if the queue has a DLX
    pub async fn reject(self) -> Result<(), MessagingError> {
        match self {
            Self::RabbitMq(acker) => acker
                .reject(lapin::options::BasicRejectOptions { requeue: false })
                .await
                .map(|_| ())
                .map_err(|e| MessagingError::acknowledgement(e.to_string())),
            Self::InMemory(acker) => {
                acker.reject();
                Ok(())
            }
        }
    }
}
