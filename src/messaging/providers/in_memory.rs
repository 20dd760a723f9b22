//! # In-Memory Broker
//!
//! Process-local exchange/queue routing with AMQP topic semantics, used by
//! tests and local development. Clones share one broker, so a test can keep a
//! handle for inspection and fault injection while the connection manager owns
//! another.
//!
//! Rejected deliveries are never requeued. They are re-routed through the
//! queue's dead-letter exchange when one is declared and dropped otherwise.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tracing::{debug, warn};

use crate::messaging::provider::{Delivery, DeliveryAcker, DeliveryStream, InboundMessage};
use crate::messaging::topic::topic_matches;
use crate::messaging::topology::{BindingSpec, DeadLetterSpec, ExchangeKind, Topology};
use crate::messaging::MessagingError;

#[derive(Debug, Clone)]
struct StoredMessage {
    exchange: String,
    routing_key: String,
    payload: Vec<u8>,
}

#[derive(Debug)]
struct MemoryQueue {
    messages: Mutex<VecDeque<StoredMessage>>,
    notify: Notify,
    dead_letter: Option<DeadLetterSpec>,
}

impl MemoryQueue {
    fn push(&self, message: StoredMessage) {
        self.messages.lock().push_back(message);
        self.notify.notify_waiters();
    }

    fn pop(&self) -> Option<StoredMessage> {
        self.messages.lock().pop_front()
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: Mutex<HashMap<String, ExchangeKind>>,
    queues: Mutex<HashMap<String, Arc<MemoryQueue>>>,
    bindings: Mutex<Vec<BindingSpec>>,
    sessions: Mutex<Vec<Arc<watch::Sender<bool>>>>,
    connect_delay: Mutex<Duration>,
    next_declare_delay: Mutex<Option<Duration>>,
    fail_next_connects: AtomicU32,
    fail_next_publishes: AtomicU32,
    fail_publishes_to: Mutex<HashMap<String, u32>>,
    connections_opened: AtomicU64,
    topology_declarations: AtomicU64,
    published: AtomicU64,
    acked: AtomicU64,
    rejected: AtomicU64,
    dead_lettered: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(&self) -> Result<InMemorySession, MessagingError> {
        let delay = *self.state.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if take_one(&self.state.fail_next_connects) {
            return Err(MessagingError::connection("in-memory broker refused connection"));
        }

        self.state.connections_opened.fetch_add(1, Ordering::SeqCst);
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);
        self.state.sessions.lock().push(Arc::clone(&closed));

        Ok(InMemorySession {
            broker: self.clone(),
            closed,
        })
    }

    // ----- fault injection -----

    /// The next `count` connection attempts fail
    pub fn fail_next_connects(&self, count: u32) {
        self.state.fail_next_connects.store(count, Ordering::SeqCst);
    }

    /// The next `count` publishes fail
    pub fn fail_next_publishes(&self, count: u32) {
        self.state.fail_next_publishes.store(count, Ordering::SeqCst);
    }

    /// The next `count` publishes with exactly `routing_key` fail
    pub fn fail_next_publishes_to(&self, routing_key: &str, count: u32) {
        self.state
            .fail_publishes_to
            .lock()
            .insert(routing_key.to_string(), count);
    }

    /// The next topology declaration is applied at once but only confirmed
    /// after `delay`
    pub fn delay_next_declare(&self, delay: Duration) {
        *self.state.next_declare_delay.lock() = Some(delay);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock() = delay;
    }

    /// Drops every open session as if the transport had failed
    pub fn sever_connections(&self) {
        let sessions: Vec<_> = self.state.sessions.lock().drain(..).collect();
        for closed in sessions {
            closed.send_replace(true);
        }
    }

    // ----- inspection -----

    pub fn connection_count(&self) -> u64 {
        self.state.connections_opened.load(Ordering::SeqCst)
    }

    pub fn topology_declaration_count(&self) -> u64 {
        self.state.topology_declarations.load(Ordering::SeqCst)
    }

    pub fn published_count(&self) -> u64 {
        self.state.published.load(Ordering::SeqCst)
    }

    pub fn acked_count(&self) -> u64 {
        self.state.acked.load(Ordering::SeqCst)
    }

    pub fn rejected_count(&self) -> u64 {
        self.state.rejected.load(Ordering::SeqCst)
    }

    pub fn dead_lettered_count(&self) -> u64 {
        self.state.dead_lettered.load(Ordering::SeqCst)
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.state.exchanges.lock().contains_key(name)
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.state.queues.lock().contains_key(name)
    }

    /// Messages waiting in a queue; zero for unknown queues
    pub fn queue_depth(&self, name: &str) -> usize {
        self.queue(name)
            .map(|queue| queue.messages.lock().len())
            .unwrap_or(0)
    }

    /// Removes and returns every waiting payload, oldest first
    pub fn drain_queue(&self, name: &str) -> Vec<Vec<u8>> {
        self.queue(name)
            .map(|queue| {
                queue
                    .messages
                    .lock()
                    .drain(..)
                    .map(|message| message.payload)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn take_targeted_failure(&self, routing_key: &str) -> bool {
        match self.state.fail_publishes_to.lock().get_mut(routing_key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn queue(&self, name: &str) -> Option<Arc<MemoryQueue>> {
        self.state.queues.lock().get(name).cloned()
    }

    fn declare(&self, topology: &Topology) -> Result<(), MessagingError> {
        {
            let mut exchanges = self.state.exchanges.lock();
            for exchange in topology.exchanges() {
                match exchanges.get(&exchange.name) {
                    Some(kind) if *kind != exchange.kind => {
                        return Err(MessagingError::topology(
                            &exchange.name,
                            format!("exchange already declared as {kind:?}"),
                        ));
                    }
                    Some(_) => {}
                    None => {
                        exchanges.insert(exchange.name.clone(), exchange.kind);
                    }
                }
            }
        }
        {
            let mut queues = self.state.queues.lock();
            for queue in topology.queues() {
                if let Some(existing) = queues.get(&queue.name) {
                    if existing.dead_letter != queue.dead_letter {
                        return Err(MessagingError::topology(
                            &queue.name,
                            "queue already declared with different dead-letter arguments",
                        ));
                    }
                    continue;
                }
                queues.insert(
                    queue.name.clone(),
                    Arc::new(MemoryQueue {
                        messages: Mutex::new(VecDeque::new()),
                        notify: Notify::new(),
                        dead_letter: queue.dead_letter.clone(),
                    }),
                );
            }
        }
        {
            let mut bindings = self.state.bindings.lock();
            for binding in topology.bindings() {
                if !bindings.contains(binding) {
                    bindings.push(binding.clone());
                }
            }
        }

        self.state.topology_declarations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Delivers to every bound queue, returning how many received a copy
    fn route(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<usize, MessagingError> {
        let kind = self
            .state
            .exchanges
            .lock()
            .get(exchange)
            .copied()
            .ok_or_else(|| {
                MessagingError::publish(exchange, routing_key, "exchange not declared")
            })?;

        let mut targets: Vec<String> = self
            .state
            .bindings
            .lock()
            .iter()
            .filter(|binding| binding.exchange == exchange)
            .filter(|binding| match kind {
                ExchangeKind::Direct => binding.routing_key == routing_key,
                ExchangeKind::Topic => topic_matches(&binding.routing_key, routing_key),
            })
            .map(|binding| binding.queue.clone())
            .collect();
        targets.sort();
        targets.dedup();

        let mut delivered = 0;
        for name in targets {
            if let Some(queue) = self.queue(&name) {
                queue.push(StoredMessage {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    payload: payload.to_vec(),
                });
                delivered += 1;
            }
        }

        if delivered == 0 {
            debug!(exchange, routing_key, "Message unroutable, dropped");
        }
        Ok(delivered)
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Debug)]
pub struct InMemorySession {
    broker: InMemoryBroker,
    closed: Arc<watch::Sender<bool>>,
}

impl InMemorySession {
    fn ensure_open(&self) -> Result<(), MessagingError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(MessagingError::connection("in-memory session closed"))
        }
    }

    pub fn declare_topology(&self, topology: &Topology) -> Result<(), MessagingError> {
        self.ensure_open()?;
        self.broker.declare(topology)
    }

    pub async fn declare_confirmed(&self) {
        let delay = self.broker.state.next_declare_delay.lock().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), MessagingError> {
        self.ensure_open()?;
        if take_one(&self.broker.state.fail_next_publishes)
            || self.broker.take_targeted_failure(routing_key)
        {
            return Err(MessagingError::publish(exchange, routing_key, "injected publish failure"));
        }
        self.broker.route(exchange, routing_key, payload)?;
        self.broker.state.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn consume(&self, queue: &str) -> Result<DeliveryStream, MessagingError> {
        self.ensure_open()?;
        let memory_queue = self
            .broker
            .queue(queue)
            .ok_or_else(|| MessagingError::consume(queue, "queue not declared"))?;

        let state = (self.broker.clone(), memory_queue, self.closed.subscribe());
        let stream = futures::stream::unfold(state, |(broker, queue, mut closed)| async move {
            loop {
                let is_closed = *closed.borrow();
                if is_closed {
                    return None;
                }

                let notified = queue.notify.notified();
                if let Some(message) = queue.pop() {
                    drop(notified);
                    let delivery = Delivery::new(
                        InboundMessage {
                            payload: message.payload.clone(),
                            exchange: message.exchange.clone(),
                            routing_key: message.routing_key.clone(),
                            redelivered: false,
                        },
                        DeliveryAcker::InMemory(InMemoryAcker {
                            broker: broker.clone(),
                            dead_letter: queue.dead_letter.clone(),
                            message,
                        }),
                    );
                    return Some((Ok(delivery), (broker, queue, closed)));
                }

                tokio::select! {
                    _ = notified => {}
                    changed = closed.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    pub fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }

    pub fn close_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    pub fn close(&self) {
        self.closed.send_replace(true);
    }
}

#[derive(Debug)]
pub struct InMemoryAcker {
    broker: InMemoryBroker,
    dead_letter: Option<DeadLetterSpec>,
    message: StoredMessage,
}

impl InMemoryAcker {
    pub fn ack(self) {
        self.broker.state.acked.fetch_add(1, Ordering::SeqCst);
    }

    pub fn reject(self) {
        self.broker.state.rejected.fetch_add(1, Ordering::SeqCst);
        let Some(dead_letter) = self.dead_letter else {
            return;
        };
        match self
            .broker
            .route(&dead_letter.exchange, &dead_letter.routing_key, &self.message.payload)
        {
            Ok(_) => {
                self.broker.state.dead_lettered.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => warn!(error = %e, "Dead-letter routing failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn topology() -> Topology {
        Topology::new()
            .exchange("events")
            .queue_with_dead_letter("approved")
            .queue("all")
            .bind("approved", "events", "user.candidate.approved")
            .bind("all", "events", "user.#")
    }

    #[tokio::test]
    async fn test_topic_routing_fans_out() {
        let broker = InMemoryBroker::new();
        let session = broker.connect().await.unwrap();
        session.declare_topology(&topology()).unwrap();

        session.publish("events", "user.candidate.approved", b"{}").unwrap();
        session.publish("events", "user.candidate.rejected", b"{}").unwrap();

        assert_eq!(broker.queue_depth("approved"), 1);
        assert_eq!(broker.queue_depth("all"), 2);
        assert_eq!(broker.published_count(), 2);
    }

    #[tokio::test]
    async fn test_publish_to_unknown_exchange_fails() {
        let broker = InMemoryBroker::new();
        let session = broker.connect().await.unwrap();

        let err = session.publish("missing", "key", b"{}").unwrap_err();
        assert!(matches!(err, MessagingError::Publish { .. }));
    }

    #[tokio::test]
    async fn test_reject_routes_to_dead_letter_queue() {
        let broker = InMemoryBroker::new();
        let session = broker.connect().await.unwrap();
        session.declare_topology(&topology()).unwrap();
        session.publish("events", "user.candidate.approved", b"{\"n\":1}").unwrap();

        let mut stream = session.consume("approved").unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        let (_, acker) = delivery.into_parts();
        acker.reject().await.unwrap();

        assert_eq!(broker.queue_depth("approved"), 0);
        assert_eq!(broker.drain_queue("approved_dlq"), vec![b"{\"n\":1}".to_vec()]);
        assert_eq!(broker.rejected_count(), 1);
        assert_eq!(broker.dead_lettered_count(), 1);
    }

    #[tokio::test]
    async fn test_consumer_wakes_on_publish() {
        let broker = InMemoryBroker::new();
        let session = broker.connect().await.unwrap();
        session.declare_topology(&topology()).unwrap();
        let mut stream = session.consume("all").unwrap();

        let publisher = broker.connect().await.unwrap();
        let handle = tokio::spawn(async move { stream.next().await });
        tokio::task::yield_now().await;
        publisher.publish("events", "user.x", b"1").unwrap();

        let delivery = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.message().routing_key, "user.x");
    }

    #[tokio::test]
    async fn test_sever_ends_streams_and_closes_sessions() {
        let broker = InMemoryBroker::new();
        let session = broker.connect().await.unwrap();
        session.declare_topology(&topology()).unwrap();
        let mut stream = session.consume("all").unwrap();

        broker.sever_connections();

        assert!(!session.is_open());
        assert!(stream.next().await.is_none());
        assert!(session.publish("events", "user.x", b"1").is_err());
    }

    #[tokio::test]
    async fn test_injected_connect_failures_are_consumed() {
        let broker = InMemoryBroker::new();
        broker.fail_next_connects(2);

        assert!(broker.connect().await.is_err());
        assert!(broker.connect().await.is_err());
        assert!(broker.connect().await.is_ok());
        assert_eq!(broker.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_conflicting_redeclaration_fails() {
        let broker = InMemoryBroker::new();
        let session = broker.connect().await.unwrap();
        session.declare_topology(&topology()).unwrap();

        let conflicting = Topology::new().queue("approved");
        assert!(matches!(
            session.declare_topology(&conflicting),
            Err(MessagingError::Topology { .. })
        ));
    }
}
