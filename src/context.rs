//! # Service Context
//!
//! Dependency container for a recruitment service process. It owns the breaker
//! registry, the cached user directory, the broker connection and the
//! reference-data slot, and hands them to the components that need them.
//! Nothing in the crate lives in a global.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::cache::{CachedUserDirectory, UserDirectory};
use crate::config::{ConfigLoader, RecruitConfig};
use crate::constants::{exchanges, queues, routing_keys};
use crate::coordination::{CatalogResponder, ReferenceDataCoordinator};
use crate::events::{EventPublisher, EventSubscriber, TestCatalog};
use crate::gateway::{ResilientGateway, UserServiceClient};
use crate::messaging::{BrokerProvider, ConnectionManager, Topology};
use crate::orchestration::{BatchOrchestrator, TestSelection};
use crate::resilience::CircuitBreakerManager;
use crate::CoreResult;

pub struct ServiceContext {
    pub service_id: Uuid,

    pub config: Arc<RecruitConfig>,

    /// One breaker per outbound operation
    pub circuit_breakers: Arc<CircuitBreakerManager>,

    pub user_service: Arc<UserServiceClient>,

    /// TTL-cached profile lookups used by the orchestrator
    pub user_directory: Arc<CachedUserDirectory>,

    pub connection: ConnectionManager,

    pub publisher: EventPublisher,

    pub subscriber: EventSubscriber,

    /// Shared slot for the active test catalog
    pub test_catalog: ReferenceDataCoordinator<TestCatalog>,

    pub orchestrator: BatchOrchestrator,
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("service_id", &self.service_id)
            .field("environment", &self.config.environment)
            .field("circuit_breakers", &"Arc<CircuitBreakerManager>")
            .field("user_service", &"Arc<UserServiceClient>")
            .field(
                "user_directory",
                &format!(
                    "CachedUserDirectory(entries={})",
                    self.user_directory.cached_entries()
                ),
            )
            .field("connection", &self.connection)
            .field("test_catalog", &self.test_catalog)
            .finish()
    }
}

impl ServiceContext {
    /// Loads configuration from the environment and builds the context
    pub fn new() -> CoreResult<Self> {
        info!("🔧 Initializing ServiceContext with environment configuration");
        Self::from_config(ConfigLoader::load()?)
    }

    pub fn from_config(config: RecruitConfig) -> CoreResult<Self> {
        let provider = BrokerProvider::from_config(&config.broker);
        Self::from_parts(config, provider, None)
    }

    /// Builds the context around an explicit broker provider. `profiles`
    /// replaces the user service as the source behind the profile cache.
    pub fn from_parts(
        config: RecruitConfig,
        provider: BrokerProvider,
        profiles: Option<Arc<dyn UserDirectory>>,
    ) -> CoreResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        info!(
            environment = %config.environment,
            provider = provider.provider_name(),
            "🔧 Initializing ServiceContext"
        );

        let circuit_breakers = Arc::new(CircuitBreakerManager::from_config(&config.circuit_breakers));
        let gateway = ResilientGateway::new(Arc::clone(&circuit_breakers));
        let user_service = Arc::new(UserServiceClient::new(&config.peer_service, gateway)?);

        let source: Arc<dyn UserDirectory> = match profiles {
            Some(source) => source,
            None => user_service.clone() as Arc<dyn UserDirectory>,
        };
        let user_directory = Arc::new(CachedUserDirectory::new(source, config.cache.ttl()));

        let connection = ConnectionManager::new(
            provider,
            Topology::recruitment_default(),
            config.broker.reconnect.to_strategy(),
        );
        let publisher = EventPublisher::new(connection.clone());
        let subscriber = EventSubscriber::new(connection.clone());

        let test_catalog = ReferenceDataCoordinator::new(
            "test_catalog",
            publisher.clone(),
            exchanges::TEST_EVENTS,
            routing_keys::TEST_LIST_REQUEST,
            config.coordination.reference_wait(),
        )
        .with_ttl(config.coordination.reference_ttl());

        let orchestrator = BatchOrchestrator::new(
            user_directory.clone(),
            publisher.clone(),
            test_catalog.clone(),
            TestSelection::from_config(&config.orchestration),
            config.orchestration.max_concurrency,
        );

        info!("✅ ServiceContext ready");
        Ok(Self {
            service_id: Uuid::new_v4(),
            config,
            circuit_breakers,
            user_service,
            user_directory,
            connection,
            publisher,
            subscriber,
            test_catalog,
            orchestrator,
        })
    }

    /// Connects to the broker and attaches the catalog reply consumer and the
    /// candidate approval consumer
    pub async fn start_consumers(&self) -> CoreResult<()> {
        self.connection.ensure_connected().await?;
        self.test_catalog
            .attach_reply_consumer(
                &self.subscriber,
                queues::TEST_LIST_RESPONSE,
                exchanges::TEST_EVENTS,
                routing_keys::TEST_LIST_RESPONSE,
            )
            .await?;
        self.orchestrator.attach_consumers(&self.subscriber).await?;
        info!("✅ Message consumers started");
        Ok(())
    }

    /// Answers catalog requests from this process with `catalog`
    pub async fn serve_catalog(&self, catalog: TestCatalog) -> CoreResult<CatalogResponder> {
        let responder = CatalogResponder::new(self.publisher.clone(), catalog);
        responder.attach(&self.subscriber).await?;
        info!(tests = responder.catalog().len(), "📚 Serving test catalog");
        Ok(responder)
    }

    pub async fn breaker_summary(&self) -> String {
        self.circuit_breakers
            .get_system_metrics()
            .await
            .format_summary()
    }

    pub async fn shutdown(&self) {
        info!("🛑 Shutting down ServiceContext");
        self.connection.close().await;
    }
}
