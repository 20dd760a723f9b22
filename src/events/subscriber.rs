use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::messaging::{ConnectionManager, InboundMessage, MessageHandler, MessagingError};

/// Registers typed event handlers on the shared connection
#[derive(Debug, Clone)]
pub struct EventSubscriber {
    connection: ConnectionManager,
}

impl EventSubscriber {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    /// Runs `handler` for every event arriving on `queue`.
    ///
    /// Bodies that do not deserialize as `T` are rejected without reaching the
    /// handler, exactly like a handler error.
    pub async fn on_event<T, F, Fut>(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        handler: F,
    ) -> Result<(), MessagingError>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.connection
            .consume(
                queue,
                exchange,
                routing_key,
                TypedHandler {
                    handler: Arc::new(handler),
                    _event: PhantomData,
                },
            )
            .await
    }
}

struct TypedHandler<T, F> {
    handler: Arc<F>,
    _event: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T, F, Fut> MessageHandler for TypedHandler<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: &InboundMessage) -> anyhow::Result<()> {
        let event: T = message.json()?;
        (self.handler)(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPublisher;
    use crate::messaging::{BrokerProvider, InMemoryBroker, ReconnectStrategy, Topology};
    use serde::{Deserialize, Serialize};
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
        tags: Vec<String>,
    }

    #[tokio::test]
    async fn test_typed_round_trip_and_bad_body_rejected() {
        let broker = InMemoryBroker::new();
        let connection = ConnectionManager::new(
            BrokerProvider::InMemory(broker.clone()),
            Topology::new().exchange("pings").queue_with_dead_letter("ping.queue"),
            ReconnectStrategy::OnNextUse,
        );
        let (tx, mut rx) = mpsc::unbounded_channel();

        EventSubscriber::new(connection.clone())
            .on_event("ping.queue", "pings", "ping.#", move |ping: Ping| {
                let tx = tx.clone();
                async move {
                    tx.send(ping)?;
                    Ok(())
                }
            })
            .await
            .unwrap();

        let sent = Ping {
            seq: 7,
            tags: vec!["a".into(), "b".into()],
        };
        let publisher = EventPublisher::new(connection.clone());
        publisher.publish_event("pings", "ping.sent", &sent).await.unwrap();
        connection.publish("pings", "ping.sent", b"not json").await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, sent);

        for _ in 0..100 {
            if broker.rejected_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(broker.acked_count(), 1);
        assert_eq!(broker.drain_queue("ping.queue_dlq"), vec![b"not json".to_vec()]);
    }
}
