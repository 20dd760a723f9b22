//! Test-service side of the catalog request/reply exchange.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::constants::{exchanges, queues, routing_keys};
use crate::events::payloads::{ReferenceReply, TestListRequest};
use crate::events::{EventPublisher, EventSubscriber, TestCatalog};
use crate::messaging::MessagingError;

/// Answers `test.list.request` with the active catalog, echoing the request's
/// correlation id
#[derive(Debug, Clone)]
pub struct CatalogResponder {
    publisher: EventPublisher,
    catalog: Arc<RwLock<TestCatalog>>,
}

impl CatalogResponder {
    pub fn new(publisher: EventPublisher, catalog: TestCatalog) -> Self {
        Self {
            publisher,
            catalog: Arc::new(RwLock::new(catalog)),
        }
    }

    pub fn set_catalog(&self, catalog: TestCatalog) {
        *self.catalog.write() = catalog;
    }

    pub fn catalog(&self) -> TestCatalog {
        self.catalog.read().clone()
    }

    pub async fn respond(&self, request: TestListRequest) -> Result<(), MessagingError> {
        let reply = ReferenceReply::new(request.correlation_id, self.catalog());
        self.publisher
            .publish_event(
                exchanges::TEST_EVENTS,
                routing_keys::TEST_LIST_RESPONSE,
                &reply,
            )
            .await?;
        info!(
            tests = reply.data.len(),
            correlation_id = ?request.correlation_id,
            "Published test list"
        );
        Ok(())
    }

    pub async fn attach(&self, subscriber: &EventSubscriber) -> Result<(), MessagingError> {
        let responder = self.clone();
        subscriber
            .on_event(
                queues::TEST_LIST_REQUEST,
                exchanges::TEST_EVENTS,
                routing_keys::TEST_LIST_REQUEST,
                move |request: TestListRequest| {
                    let responder = responder.clone();
                    async move { responder.respond(request).await.map_err(anyhow::Error::from) }
                },
            )
            .await
    }
}
