//! # Messaging
//!
//! Broker plumbing shared by the event publisher, the event subscriber and the
//! reference-data coordinator.
//!
//! - [`ConnectionManager`]: one lazily established, self-healing connection
//! - [`Topology`]: exchanges, queues and bindings declared on every connect
//! - [`BrokerProvider`]: RabbitMQ or in-memory backend, chosen from config

pub mod connection;
pub mod errors;
pub mod provider;
pub mod providers;
pub mod topic;
pub mod topology;

pub use connection::{
    handler_fn, ConnectionManager, ConnectionState, FnHandler, MessageHandler, ReconnectStrategy,
};
pub use errors::MessagingError;
pub use provider::{BrokerProvider, BrokerSession, Delivery, DeliveryStream, InboundMessage};
pub use providers::{InMemoryBroker, RabbitMqBroker};
pub use topic::topic_matches;
pub use topology::{
    dead_letter_exchange_name, dead_letter_queue_name, BindingSpec, DeadLetterSpec, ExchangeKind,
    ExchangeSpec, QueueSpec, Topology,
};
