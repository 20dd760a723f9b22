//! # Reference Data Coordinator
//!
//! Request/reply over pub/sub for data owned by another service, such as the
//! active test catalog.
//!
//! A refresh publishes a request carrying a fresh correlation id, then waits
//! until the reply consumer writes a newer version into the shared slot or the
//! wait window elapses, whichever comes first. Replies without a correlation id
//! still refresh the slot, so responders that do not echo ids keep working.
//!
//! Overlapping refreshes share one request. A refresh runs on its own task and
//! always completes even if every caller stops waiting.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::payloads::{ReferenceReply, TestListRequest};
use crate::events::{EventPublisher, EventSubscriber};
use crate::messaging::MessagingError;

#[derive(Debug)]
struct Slot<T> {
    version: u64,
    data: Option<Arc<T>>,
    correlation_id: Option<Uuid>,
    updated_at: Option<Instant>,
}

/// Result of a refresh
#[derive(Debug)]
pub struct ReferenceOutcome<T> {
    /// Latest known data, possibly from an earlier refresh
    pub data: Option<Arc<T>>,
    /// A reply arrived during this refresh
    pub fresh: bool,
    /// The reply echoed this refresh's correlation id
    pub correlated: bool,
}

impl<T> Clone for ReferenceOutcome<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            fresh: self.fresh,
            correlated: self.correlated,
        }
    }
}

impl<T> ReferenceOutcome<T> {
    pub fn is_empty(&self) -> bool {
        self.data.is_none()
    }
}

type SharedRefresh<T> = Shared<BoxFuture<'static, ReferenceOutcome<T>>>;

struct CoordinatorInner<T> {
    name: String,
    publisher: EventPublisher,
    request_exchange: String,
    request_routing_key: String,
    wait: Duration,
    ttl: Mutex<Duration>,
    slot: watch::Sender<Slot<T>>,
    in_flight: Mutex<Option<SharedRefresh<T>>>,
}

pub struct ReferenceDataCoordinator<T> {
    inner: Arc<CoordinatorInner<T>>,
}

impl<T> Clone for ReferenceDataCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for ReferenceDataCoordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.inner.slot.borrow();
        f.debug_struct("ReferenceDataCoordinator")
            .field("name", &self.inner.name)
            .field("request_exchange", &self.inner.request_exchange)
            .field("request_routing_key", &self.inner.request_routing_key)
            .field("wait", &self.inner.wait)
            .field("ttl", &*self.inner.ttl.lock())
            .field("version", &slot.version)
            .field("has_data", &slot.data.is_some())
            .finish()
    }
}

impl<T> ReferenceDataCoordinator<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<String>,
        publisher: EventPublisher,
        request_exchange: impl Into<String>,
        request_routing_key: impl Into<String>,
        wait: Duration,
    ) -> Self {
        let (slot, _) = watch::channel(Slot {
            version: 0,
            data: None,
            correlation_id: None,
            updated_at: None,
        });
        Self {
            inner: Arc::new(CoordinatorInner {
                name: name.into(),
                publisher,
                request_exchange: request_exchange.into(),
                request_routing_key: request_routing_key.into(),
                wait,
                ttl: Mutex::new(Duration::MAX),
                slot,
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Data older than `ttl` is reported as expired. Without a TTL the slot
    /// never expires. Applies to every clone.
    pub fn with_ttl(self, ttl: Duration) -> Self {
        *self.inner.ttl.lock() = ttl;
        self
    }

    pub fn wait_window(&self) -> Duration {
        self.inner.wait
    }

    /// Latest data without issuing a request
    pub fn current(&self) -> Option<Arc<T>> {
        self.inner.slot.borrow().data.clone()
    }

    /// Time since the slot was last written
    pub fn age(&self) -> Option<Duration> {
        self.inner.slot.borrow().updated_at.map(|at| at.elapsed())
    }

    /// True when nothing was received yet or the last reply is past its TTL
    pub fn is_expired(&self) -> bool {
        let ttl = *self.inner.ttl.lock();
        self.age().map_or(true, |age| age >= ttl)
    }

    /// Latest data while it is within its TTL
    pub fn unexpired(&self) -> Option<Arc<T>> {
        if self.is_expired() {
            None
        } else {
            self.current()
        }
    }

    /// Stores a reply and wakes every waiting refresh
    pub fn accept_reply(&self, reply: ReferenceReply<T>) {
        let correlation_id = reply.correlation_id;
        self.inner.slot.send_modify(|slot| {
            slot.version += 1;
            slot.data = Some(Arc::new(reply.data));
            slot.correlation_id = correlation_id;
            slot.updated_at = Some(Instant::now());
        });
        debug!(
            coordinator = %self.inner.name,
            correlation_id = ?correlation_id,
            "Reference data updated"
        );
    }

    /// Publishes a request and waits for a reply, joining a refresh that is
    /// already in flight
    pub async fn refresh(&self) -> ReferenceOutcome<T> {
        let pending = {
            let mut in_flight = self.inner.in_flight.lock();
            match &*in_flight {
                Some(pending) => pending.clone(),
                None => {
                    let pending = self.spawn_refresh();
                    *in_flight = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    fn spawn_refresh(&self) -> SharedRefresh<T> {
        let coordinator = self.clone();
        let handle = tokio::spawn(async move {
            let outcome = coordinator.request_and_wait().await;
            *coordinator.inner.in_flight.lock() = None;
            outcome
        });

        let fallback = self.clone();
        async move {
            handle.await.unwrap_or_else(|e| {
                warn!(coordinator = %fallback.inner.name, error = %e, "Reference refresh task failed");
                *fallback.inner.in_flight.lock() = None;
                fallback.stale()
            })
        }
        .boxed()
        .shared()
    }

    async fn request_and_wait(&self) -> ReferenceOutcome<T> {
        let correlation_id = Uuid::new_v4();
        let mut updates = self.inner.slot.subscribe();
        let start_version = updates.borrow().version;

        if let Err(error) = self
            .inner
            .publisher
            .publish_event(
                &self.inner.request_exchange,
                &self.inner.request_routing_key,
                &TestListRequest::correlated(correlation_id),
            )
            .await
        {
            warn!(
                coordinator = %self.inner.name,
                error = %error,
                "Reference data request not published, serving cached data"
            );
            return self.stale();
        }
        debug!(coordinator = %self.inner.name, %correlation_id, "Reference data requested");

        let arrived = tokio::time::timeout(
            self.inner.wait,
            updates.wait_for(|slot| slot.version > start_version),
        )
        .await;

        match arrived {
            Ok(Ok(slot)) => {
                let correlated = slot.correlation_id == Some(correlation_id);
                let outcome = ReferenceOutcome {
                    data: slot.data.clone(),
                    fresh: true,
                    correlated,
                };
                drop(slot);
                info!(coordinator = %self.inner.name, correlated, "Reference data refreshed");
                outcome
            }
            _ => {
                warn!(
                    coordinator = %self.inner.name,
                    wait_ms = self.inner.wait.as_millis() as u64,
                    "No reference data reply within wait window"
                );
                self.stale()
            }
        }
    }

    fn stale(&self) -> ReferenceOutcome<T> {
        ReferenceOutcome {
            data: self.current(),
            fresh: false,
            correlated: false,
        }
    }
}

impl<T> ReferenceDataCoordinator<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    /// Feeds replies arriving on `queue` into the slot
    pub async fn attach_reply_consumer(
        &self,
        subscriber: &EventSubscriber,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), MessagingError> {
        let coordinator = self.clone();
        subscriber
            .on_event(queue, exchange, routing_key, move |reply: ReferenceReply<T>| {
                let coordinator = coordinator.clone();
                async move {
                    coordinator.accept_reply(reply);
                    Ok::<(), anyhow::Error>(())
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{exchanges, queues, routing_keys};
    use crate::coordination::CatalogResponder;
    use crate::events::{TestCatalog, TestDefinition};
    use crate::messaging::{
        BrokerProvider, ConnectionManager, InMemoryBroker, ReconnectStrategy, Topology,
    };

    struct Harness {
        broker: InMemoryBroker,
        publisher: EventPublisher,
        subscriber: EventSubscriber,
        coordinator: ReferenceDataCoordinator<TestCatalog>,
    }

    async fn harness() -> Harness {
        let broker = InMemoryBroker::new();
        let connection = ConnectionManager::new(
            BrokerProvider::InMemory(broker.clone()),
            Topology::recruitment_default(),
            ReconnectStrategy::OnNextUse,
        );
        let publisher = EventPublisher::new(connection.clone());
        let subscriber = EventSubscriber::new(connection);
        let coordinator = ReferenceDataCoordinator::new(
            "test_catalog",
            publisher.clone(),
            exchanges::TEST_EVENTS,
            routing_keys::TEST_LIST_REQUEST,
            Duration::from_secs(2),
        );
        coordinator
            .attach_reply_consumer(
                &subscriber,
                queues::TEST_LIST_RESPONSE,
                exchanges::TEST_EVENTS,
                routing_keys::TEST_LIST_RESPONSE,
            )
            .await
            .unwrap();
        Harness {
            broker,
            publisher,
            subscriber,
            coordinator,
        }
    }

    fn catalog() -> TestCatalog {
        TestCatalog::new(vec![
            TestDefinition::new("t1", "D-70"),
            TestDefinition::new("t2", "D-2000"),
        ])
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_wakes_waiter_before_deadline() {
        let h = harness().await;
        CatalogResponder::new(h.publisher.clone(), catalog())
            .attach(&h.subscriber)
            .await
            .unwrap();

        let started = Instant::now();
        let outcome = h.coordinator.refresh().await;

        assert!(outcome.fresh);
        assert!(outcome.correlated);
        assert_eq!(outcome.data.unwrap().len(), 2);
        assert!(started.elapsed() < h.coordinator.wait_window());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reply_returns_empty_after_wait() {
        let h = harness().await;

        let started = Instant::now();
        let outcome = h.coordinator.refresh().await;

        assert!(!outcome.fresh);
        assert!(outcome.is_empty());
        assert!(started.elapsed() >= h.coordinator.wait_window());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_refreshes_share_one_request() {
        let h = harness().await;

        let outcomes =
            futures::future::join_all((0..5).map(|_| h.coordinator.refresh())).await;

        assert!(outcomes.iter().all(|o| !o.fresh));
        assert_eq!(h.broker.queue_depth(queues::TEST_LIST_REQUEST), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uncorrelated_reply_still_refreshes() {
        let h = harness().await;

        let coordinator = h.coordinator.clone();
        let waiter = tokio::spawn(async move { coordinator.refresh().await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        h.publisher
            .publish_event(
                exchanges::TEST_EVENTS,
                routing_keys::TEST_LIST_RESPONSE,
                &serde_json::json!({ "tests": [{ "_id": "t9", "name": "D-70" }], "timestamp": 1 }),
            )
            .await
            .unwrap();

        let outcome = waiter.await.unwrap();
        assert!(outcome.fresh);
        assert!(!outcome.correlated);
        assert_eq!(outcome.data.unwrap().find_by_name("D-70").unwrap().id, "t9");
        assert!(h.coordinator.current().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_expires_after_ttl() {
        let h = harness().await;
        let coordinator = h.coordinator.clone().with_ttl(Duration::from_secs(60));
        assert!(coordinator.is_expired());

        coordinator.accept_reply(ReferenceReply::new(None, catalog()));
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!coordinator.is_expired());
        assert_eq!(coordinator.unexpired().unwrap().len(), 2);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(coordinator.is_expired());
        assert!(coordinator.unexpired().is_none());
        assert!(coordinator.current().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_data_served_when_broker_fails() {
        let h = harness().await;
        h.coordinator.accept_reply(ReferenceReply::new(None, catalog()));

        h.broker.fail_next_publishes(1);
        let outcome = h.coordinator.refresh().await;

        assert!(!outcome.fresh);
        assert_eq!(outcome.data.unwrap().len(), 2);
    }
}
