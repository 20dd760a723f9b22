//! # Connection Manager
//!
//! Owns the single broker connection shared by every publisher and consumer in
//! the process.
//!
//! ## Guarantees
//!
//! - **Single-flight connect**: concurrent callers that find no usable
//!   connection all await one shared attempt. At most one attempt is in flight.
//! - **Topology on every connect**: the full registered topology is declared
//!   before a connection is handed out, so a fresh broker is always usable.
//! - **Failure clears the slot**: a failed attempt leaves the manager
//!   disconnected; the next caller starts a new attempt.
//! - **Consumers survive reconnects**: registered consumers are re-attached to
//!   each new connection.
//! - **At most once into handlers**: a handler error or panic rejects the
//!   delivery without requeue. Dead-lettered queues keep the message in
//!   `{queue}_dlq`.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, Shared};
use futures::{FutureExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::provider::{BrokerProvider, BrokerSession, Delivery, InboundMessage};
use super::topology::{BindingSpec, ExchangeKind, ExchangeSpec, QueueSpec, Topology};
use super::MessagingError;

type SharedConnect = Shared<BoxFuture<'static, Result<Arc<BrokerSession>, MessagingError>>>;

/// How the manager reacts when an established connection drops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectStrategy {
    /// Reconnect in the background with doubling delays. `None` retries forever.
    EagerBackoff {
        initial: Duration,
        max: Duration,
        max_attempts: Option<u32>,
    },
    /// Stay disconnected until the next publish or consume needs the broker
    OnNextUse,
}

impl Default for ReconnectStrategy {
    fn default() -> Self {
        Self::EagerBackoff {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Processes one inbound message. `Ok` acknowledges it; an error rejects it.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: &InboundMessage) -> anyhow::Result<()>;
}

/// Adapts an async closure into a [`MessageHandler`]
pub struct FnHandler<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(InboundMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(InboundMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, message: &InboundMessage) -> anyhow::Result<()> {
        (self.0)(message.clone()).await
    }
}

#[derive(Clone)]
struct ConsumerRegistration {
    queue: String,
    handler: Arc<dyn MessageHandler>,
}

enum ConnectionSlot {
    Disconnected,
    Connecting {
        attempt: u64,
        future: SharedConnect,
    },
    Connected {
        generation: u64,
        session: Arc<BrokerSession>,
    },
}

struct ConnectionInner {
    provider: BrokerProvider,
    strategy: ReconnectStrategy,
    topology: RwLock<Topology>,
    slot: Mutex<ConnectionSlot>,
    consumers: Mutex<Vec<ConsumerRegistration>>,
    attempts: AtomicU64,
    reconnecting: AtomicBool,
    shutdown: AtomicBool,
}

/// Cheap to clone; all clones share one connection
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("provider", &self.inner.provider.provider_name())
            .field("strategy", &self.inner.strategy)
            .field("state", &self.state())
            .field("consumers", &self.inner.consumers.lock().len())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(provider: BrokerProvider, topology: Topology, strategy: ReconnectStrategy) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                provider,
                strategy,
                topology: RwLock::new(topology),
                slot: Mutex::new(ConnectionSlot::Disconnected),
                consumers: Mutex::new(Vec::new()),
                attempts: AtomicU64::new(0),
                reconnecting: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    pub fn provider(&self) -> &BrokerProvider {
        &self.inner.provider
    }

    pub fn strategy(&self) -> ReconnectStrategy {
        self.inner.strategy
    }

    pub fn topology(&self) -> Topology {
        self.inner.topology.read().clone()
    }

    pub fn state(&self) -> ConnectionState {
        match &*self.inner.slot.lock() {
            ConnectionSlot::Disconnected => ConnectionState::Disconnected,
            ConnectionSlot::Connecting { .. } => ConnectionState::Connecting,
            ConnectionSlot::Connected { session, .. } if session.is_open() => {
                ConnectionState::Connected
            }
            ConnectionSlot::Connected { .. } => ConnectionState::Disconnected,
        }
    }

    fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Returns the open connection, joining or starting a connection attempt
    /// when there is none
    pub async fn connect(&self) -> Result<Arc<BrokerSession>, MessagingError> {
        if self.is_shut_down() {
            return Err(MessagingError::Shutdown);
        }

        let pending = {
            let mut slot = self.inner.slot.lock();
            match &*slot {
                ConnectionSlot::Connected { session, .. } if session.is_open() => {
                    return Ok(Arc::clone(session));
                }
                ConnectionSlot::Connecting { future, .. } => future.clone(),
                _ => {
                    let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let future = self.spawn_attempt(attempt);
                    *slot = ConnectionSlot::Connecting {
                        attempt,
                        future: future.clone(),
                    };
                    future
                }
            }
        };

        pending.await
    }

    pub async fn ensure_connected(&self) -> Result<(), MessagingError> {
        self.connect().await.map(|_| ())
    }

    // The attempt runs on its own task so a caller that gives up waiting does
    // not cancel it for everyone else.
    fn spawn_attempt(&self, attempt: u64) -> SharedConnect {
        let manager = self.clone();
        let handle = tokio::spawn(async move { manager.establish(attempt).await });
        async move {
            handle.await.unwrap_or_else(|e| {
                Err(MessagingError::connection(format!("connection task failed: {e}")))
            })
        }
        .boxed()
        .shared()
    }

    async fn establish(&self, attempt: u64) -> Result<Arc<BrokerSession>, MessagingError> {
        let provider = self.inner.provider.provider_name();
        debug!(provider, attempt, "Connecting to message broker");

        let result = self.open_session().await;

        let installed = {
            let mut slot = self.inner.slot.lock();
            let current = matches!(
                &*slot,
                ConnectionSlot::Connecting { attempt: a, .. } if *a == attempt
            );
            match (&result, current && !self.is_shut_down()) {
                (Ok(session), true) => {
                    *slot = ConnectionSlot::Connected {
                        generation: attempt,
                        session: Arc::clone(session),
                    };
                    true
                }
                (Err(_), true) => {
                    *slot = ConnectionSlot::Disconnected;
                    false
                }
                _ => false,
            }
        };

        let session = match result {
            Ok(session) => session,
            Err(error) => {
                warn!(provider, attempt, error = %error, "Broker connection attempt failed");
                return Err(error);
            }
        };

        if !installed {
            session.close().await;
            return Err(if self.is_shut_down() {
                MessagingError::Shutdown
            } else {
                MessagingError::connection("connection attempt superseded")
            });
        }

        info!(provider, generation = attempt, "Connected to message broker");
        self.watch_for_close(attempt, &session);
        self.reattach_consumers(&session);
        Ok(session)
    }

    async fn open_session(&self) -> Result<Arc<BrokerSession>, MessagingError> {
        let session = self.inner.provider.connect().await?;
        let topology = self.topology();
        if let Err(error) = session.declare_topology(&topology).await {
            session.close().await;
            return Err(error);
        }
        Ok(Arc::new(session))
    }

    fn watch_for_close(&self, generation: u64, session: &BrokerSession) {
        let weak: Weak<ConnectionInner> = Arc::downgrade(&self.inner);
        let mut signal = session.close_signal();
        tokio::spawn(async move {
            let _ = signal.wait_for(|closed| *closed).await;
            if let Some(inner) = weak.upgrade() {
                ConnectionManager { inner }.on_transport_closed(generation);
            }
        });
    }

    fn on_transport_closed(&self, generation: u64) {
        let was_current = {
            let mut slot = self.inner.slot.lock();
            let current = matches!(
                &*slot,
                ConnectionSlot::Connected { generation: g, .. } if *g == generation
            );
            if current {
                *slot = ConnectionSlot::Disconnected;
            }
            current
        };

        if !was_current || self.is_shut_down() {
            return;
        }

        warn!(generation, "Broker connection closed unexpectedly");
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&self) {
        let ReconnectStrategy::EagerBackoff {
            initial,
            max,
            max_attempts,
        } = self.inner.strategy
        else {
            info!("Broker reconnect deferred until next use");
            return;
        };

        if self.inner.reconnecting.swap(true, Ordering::AcqRel) {
            return;
        }

        let manager = self.clone();
        tokio::spawn(async move {
            let mut delay = initial;
            let mut attempts: u32 = 0;
            loop {
                tokio::time::sleep(delay).await;
                if manager.is_shut_down() {
                    break;
                }
                attempts += 1;
                match manager.connect().await {
                    Ok(_) => {
                        info!(attempts, "Broker connection re-established");
                        break;
                    }
                    Err(MessagingError::Shutdown) => break,
                    Err(error) => {
                        if max_attempts.is_some_and(|limit| attempts >= limit) {
                            error!(attempts, error = %error, "Giving up on broker reconnection");
                            break;
                        }
                        delay = (delay * 2).min(max);
                        warn!(
                            attempts,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %error,
                            "Broker reconnect attempt failed"
                        );
                    }
                }
            }
            manager.inner.reconnecting.store(false, Ordering::Release);
        });
    }

    fn is_current(&self, session: &Arc<BrokerSession>) -> bool {
        matches!(
            &*self.inner.slot.lock(),
            ConnectionSlot::Connected { session: s, .. } if Arc::ptr_eq(s, session) && s.is_open()
        )
    }

    /// Drops `session` from the slot if it is still the current connection
    async fn invalidate(&self, session: &Arc<BrokerSession>) {
        let removed = {
            let mut slot = self.inner.slot.lock();
            let current = matches!(
                &*slot,
                ConnectionSlot::Connected { session: s, .. } if Arc::ptr_eq(s, session)
            );
            if current {
                *slot = ConnectionSlot::Disconnected;
            }
            current
        };

        if removed {
            session.close().await;
            if !self.is_shut_down() {
                self.schedule_reconnect();
            }
        }
    }

    /// Publishes raw bytes, connecting first if needed. A failed publish
    /// invalidates the connection so the next caller gets a fresh one.
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), MessagingError> {
        let session = self.connect().await?;
        match session.publish(exchange, routing_key, payload).await {
            Ok(()) => {
                debug!(exchange, routing_key, bytes = payload.len(), "Message published");
                Ok(())
            }
            Err(error) => {
                warn!(exchange, routing_key, error = %error, "Publish failed");
                if error.invalidates_connection() {
                    self.invalidate(&session).await;
                }
                Err(error)
            }
        }
    }

    /// Registers a consumer for `queue`, bound to `exchange` with
    /// `routing_key`, and starts it on the current connection. The registration
    /// is re-attached after every reconnect.
    pub async fn consume<H: MessageHandler>(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        handler: H,
    ) -> Result<(), MessagingError> {
        {
            let mut topology = self.inner.topology.write();
            topology.add_exchange(ExchangeSpec {
                name: exchange.to_string(),
                kind: ExchangeKind::Topic,
                durable: true,
            });
            topology.add_queue(QueueSpec {
                name: queue.to_string(),
                durable: true,
                dead_letter: None,
            });
            topology.add_binding(BindingSpec {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            });
        }

        let registration = ConsumerRegistration {
            queue: queue.to_string(),
            handler: Arc::new(handler),
        };

        // Registration and the first attach happen under the consumers lock and
        // only while the session is still current. A reconnect that lands first
        // sends us round again; one that lands after re-attaches us itself.
        loop {
            let session = self.connect().await?;
            let topology = self.topology();
            if let Err(error) = session.declare_topology(&topology).await {
                if error.invalidates_connection() {
                    self.invalidate(&session).await;
                }
                return Err(error);
            }

            {
                let mut consumers = self.inner.consumers.lock();
                if self.is_current(&session) {
                    consumers.push(registration.clone());
                    tokio::spawn(run_consumer(session, registration.clone()));
                    break;
                }
            }
            debug!(queue, "Connection replaced while registering consumer, retrying");
        }

        info!(queue, exchange, routing_key, "Consumer registered");
        Ok(())
    }

    fn reattach_consumers(&self, session: &Arc<BrokerSession>) {
        let registrations = self.inner.consumers.lock().clone();
        if registrations.is_empty() {
            return;
        }
        debug!(count = registrations.len(), "Re-attaching consumers");
        for registration in registrations {
            tokio::spawn(run_consumer(Arc::clone(session), registration));
        }
    }

    /// Closes the connection and stops reconnecting. Later calls fail with
    /// [`MessagingError::Shutdown`].
    pub async fn close(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        let previous = std::mem::replace(&mut *self.inner.slot.lock(), ConnectionSlot::Disconnected);
        if let ConnectionSlot::Connected { session, .. } = previous {
            session.close().await;
            info!("Broker connection closed");
        }
    }
}

async fn run_consumer(session: Arc<BrokerSession>, registration: ConsumerRegistration) {
    let queue = registration.queue.as_str();
    let mut deliveries = match session.consume(queue).await {
        Ok(stream) => stream,
        Err(error) => {
            error!(queue, error = %error, "Failed to start consumer");
            return;
        }
    };
    debug!(queue, "Consumer attached");

    while let Some(next) = deliveries.next().await {
        match next {
            Ok(delivery) => process_delivery(queue, registration.handler.as_ref(), delivery).await,
            Err(error) => {
                warn!(queue, error = %error, "Delivery stream failed");
                break;
            }
        }
    }
    debug!(queue, "Consumer detached");
}

async fn process_delivery(queue: &str, handler: &dyn MessageHandler, delivery: Delivery) {
    let (message, acker) = delivery.into_parts();
    let outcome = AssertUnwindSafe(handler.handle(&message))
        .catch_unwind()
        .await;

    let settled = match outcome {
        Ok(Ok(())) => acker.ack().await,
        Ok(Err(error)) => {
            error!(
                queue,
                routing_key = %message.routing_key,
                error = ?error,
                "Handler failed, rejecting message"
            );
            acker.reject().await
        }
        Err(panic) => {
            error!(
                queue,
                routing_key = %message.routing_key,
                panic = panic_message(panic.as_ref()),
                "Handler panicked, rejecting message"
            );
            acker.reject().await
        }
    };

    if let Err(error) = settled {
        warn!(queue, error = %error, "Failed to settle delivery");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::providers::InMemoryBroker;
    use std::sync::atomic::AtomicUsize;

    fn topology() -> Topology {
        Topology::new()
            .exchange("events")
            .queue_with_dead_letter("work")
            .bind("work", "events", "work.created")
    }

    fn manager(broker: &InMemoryBroker, strategy: ReconnectStrategy) -> ConnectionManager {
        ConnectionManager::new(BrokerProvider::InMemory(broker.clone()), topology(), strategy)
    }

    fn eager() -> ReconnectStrategy {
        ReconnectStrategy::EagerBackoff {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            max_attempts: None,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_connects_share_one_attempt() {
        let broker = InMemoryBroker::new();
        broker.set_connect_delay(Duration::from_millis(50));
        let manager = manager(&broker, eager());

        let sessions = futures::future::join_all((0..10).map(|_| manager.connect())).await;

        let first = sessions[0].as_ref().unwrap();
        for session in &sessions {
            assert!(Arc::ptr_eq(first, session.as_ref().unwrap()));
        }
        assert_eq!(broker.connection_count(), 1);
        assert_eq!(broker.topology_declaration_count(), 1);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_failed_attempt_clears_slot() {
        let broker = InMemoryBroker::new();
        broker.fail_next_connects(1);
        let manager = manager(&broker, ReconnectStrategy::OnNextUse);

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, MessagingError::Connection { .. }));
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.ensure_connected().await.unwrap();
        assert_eq!(broker.connection_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eager_reconnect_after_transport_loss() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker, eager());
        manager.ensure_connected().await.unwrap();

        broker.sever_connections();
        wait_until(|| broker.connection_count() == 2).await;
        wait_until(|| manager.state() == ConnectionState::Connected).await;

        assert_eq!(broker.topology_declaration_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_next_use_waits_for_caller() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker, ReconnectStrategy::OnNextUse);
        manager.ensure_connected().await.unwrap();

        broker.sever_connections();
        wait_until(|| manager.state() == ConnectionState::Disconnected).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(broker.connection_count(), 1);

        manager.publish("events", "work.created", b"{}").await.unwrap();
        assert_eq!(broker.connection_count(), 2);
        assert_eq!(broker.queue_depth("work"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consumers_reattach_after_reconnect() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker, eager());
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        manager
            .consume(
                "work",
                "events",
                "work.created",
                handler_fn(move |_message| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok::<(), anyhow::Error>(())
                    }
                }),
            )
            .await
            .unwrap();

        manager.publish("events", "work.created", b"1").await.unwrap();
        wait_until(|| seen.load(Ordering::SeqCst) == 1).await;

        broker.sever_connections();
        wait_until(|| manager.state() == ConnectionState::Connected && broker.connection_count() == 2)
            .await;

        manager.publish("events", "work.created", b"2").await.unwrap();
        wait_until(|| seen.load(Ordering::SeqCst) == 2).await;
        assert_eq!(broker.acked_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_error_and_panic_dead_letter() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker, eager());

        manager
            .consume(
                "work",
                "events",
                "work.created",
                handler_fn(|message: InboundMessage| async move {
                    if message.payload == b"panic" {
                        panic!("handler blew up");
                    }
                    Err::<(), _>(anyhow::anyhow!("cannot process"))
                }),
            )
            .await
            .unwrap();

        manager.publish("events", "work.created", b"error").await.unwrap();
        manager.publish("events", "work.created", b"panic").await.unwrap();

        wait_until(|| broker.rejected_count() == 2).await;
        assert_eq!(broker.acked_count(), 0);
        assert_eq!(broker.queue_depth("work"), 0);
        assert_eq!(
            broker.drain_queue("work_dlq"),
            vec![b"error".to_vec(), b"panic".to_vec()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_invalidates_connection() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker, ReconnectStrategy::OnNextUse);
        manager.ensure_connected().await.unwrap();

        broker.fail_next_publishes(1);
        let err = manager.publish("events", "work.created", b"{}").await.unwrap_err();
        assert!(matches!(err, MessagingError::Publish { .. }));
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.publish("events", "work.created", b"{}").await.unwrap();
        assert_eq!(broker.connection_count(), 2);
    }

    #[tokio::test]
    async fn test_close_rejects_further_use() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker, eager());
        manager.ensure_connected().await.unwrap();

        manager.close().await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.connect().await.unwrap_err(), MessagingError::Shutdown);
    }
}
