//! Builders for contexts, profiles and catalogs used across integration tests.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use recruit_core::cache::UserDirectory;
use recruit_core::config::{BrokerProviderKind, RecruitConfig, ReconnectStrategyKind};
use recruit_core::constants::test_names;
use recruit_core::context::ServiceContext;
use recruit_core::events::{TestCatalog, TestDefinition};
use recruit_core::gateway::UserProfile;
use recruit_core::messaging::{BrokerProvider, InMemoryBroker};

use super::FakeDirectory;

pub fn test_config() -> RecruitConfig {
    let mut config = RecruitConfig {
        environment: "test".to_string(),
        ..Default::default()
    };
    config.broker.provider = BrokerProviderKind::InMemory;
    config.broker.reconnect.strategy = ReconnectStrategyKind::EagerBackoff;
    config.broker.reconnect.initial_backoff_ms = 100;
    config.broker.reconnect.max_backoff_ms = 1_000;
    config.coordination.reference_wait_ms = 500;
    config.coordination.reference_ttl_seconds = 60;
    config.orchestration.max_concurrency = 4;
    config
}

pub struct TestService {
    pub broker: InMemoryBroker,
    pub directory: Arc<FakeDirectory>,
    pub context: ServiceContext,
}

/// A context over a fresh in-memory broker with the catalog and approval
/// consumers already running
pub async fn in_memory_service(directory: FakeDirectory) -> TestService {
    let broker = InMemoryBroker::new();
    let directory = Arc::new(directory);
    let context = ServiceContext::from_parts(
        test_config(),
        BrokerProvider::InMemory(broker.clone()),
        Some(directory.clone() as Arc<dyn UserDirectory>),
    )
    .expect("context should build from test config");
    context
        .start_consumers()
        .await
        .expect("consumers should attach");

    TestService {
        broker,
        directory,
        context,
    }
}

pub fn candidate(id: &str, education_level: &str) -> UserProfile {
    UserProfile {
        id: Some(id.to_string()),
        email: Some(format!("{id}@example.com")),
        first_name: Some("Test".to_string()),
        last_name: Some(id.to_uppercase()),
        education_level: Some(education_level.to_string()),
        ..Default::default()
    }
}

pub fn sample_catalog() -> TestCatalog {
    TestCatalog::new(vec![
        TestDefinition::new("t-d70", test_names::LOW_LEVEL),
        TestDefinition::new("t-d2000", test_names::HIGH_LEVEL),
        TestDefinition::new("t-logic", test_names::LOGIC),
    ])
}

pub fn ids(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|id| id.to_string()).collect()
}

/// Removes and decodes every message waiting on `queue`
pub fn drain_json<T: DeserializeOwned>(broker: &InMemoryBroker, queue: &str) -> Vec<T> {
    broker
        .drain_queue(queue)
        .into_iter()
        .map(|body| serde_json::from_slice(&body).expect("queued body should be valid JSON"))
        .collect()
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
