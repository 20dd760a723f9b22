//! Broker backends.

pub mod in_memory;
pub mod rabbitmq;

pub use in_memory::{InMemoryBroker, InMemorySession};
pub use rabbitmq::{RabbitMqBroker, RabbitMqSession};
