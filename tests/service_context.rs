mod common;

use common::*;

use recruit_core::constants::{exchanges, queues};
use recruit_core::context::ServiceContext;
use recruit_core::events::TestCatalog;
use recruit_core::messaging::{ConnectionState, MessagingError};
use recruit_core::CoreError;

#[tokio::test(start_paused = true)]
async fn test_context_declares_platform_topology() {
    let service = in_memory_service(FakeDirectory::default()).await;

    assert_eq!(service.context.connection.state(), ConnectionState::Connected);
    for exchange in [
        exchanges::USER_EVENTS,
        exchanges::TEST_EVENTS,
        exchanges::ASSIGNMENT_EVENTS,
        exchanges::NOTIFICATION_EVENTS,
        exchanges::AUTH_EVENTS,
    ] {
        assert!(service.broker.has_exchange(exchange), "missing {exchange}");
    }
    assert!(service.broker.has_queue(queues::CANDIDATE_APPROVED));
    assert!(service.broker.has_queue("candidate.approved_dlq"));
    assert!(service.broker.has_queue(queues::TEST_LIST_RESPONSE));

    let debug = format!("{:?}", service.context);
    assert!(debug.contains("ServiceContext"));
    assert!(debug.contains("environment"));
}

#[tokio::test(start_paused = true)]
async fn test_catalog_request_reply_through_context() {
    let service = in_memory_service(FakeDirectory::default()).await;
    let responder = service
        .context
        .serve_catalog(sample_catalog())
        .await
        .unwrap();

    let outcome = service.context.test_catalog.refresh().await;
    assert!(outcome.fresh);
    assert_eq!(outcome.data.unwrap().len(), 3);

    responder.set_catalog(TestCatalog::default());
    let outcome = service.context.test_catalog.refresh().await;
    assert!(outcome.fresh);
    assert!(outcome.data.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_catalog_requests_land_on_request_queue_without_responder() {
    let service = in_memory_service(FakeDirectory::default()).await;

    let outcome = service.context.test_catalog.refresh().await;

    assert!(!outcome.fresh);
    assert!(outcome.is_empty());
    assert_eq!(service.broker.queue_depth(queues::TEST_LIST_REQUEST), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_publishing() {
    let service = in_memory_service(FakeDirectory::default()).await;

    service.context.shutdown().await;

    let result = service
        .context
        .publisher
        .publish_event(exchanges::USER_EVENTS, "user.anything", &serde_json::json!({}))
        .await;
    assert_eq!(result, Err(MessagingError::Shutdown));
    assert_eq!(service.context.connection.state(), ConnectionState::Disconnected);
}

#[test]
fn test_breaker_summary_available_before_any_call() {
    let context = tokio_test::assert_ok!(ServiceContext::from_config(test_config()));
    let summary = tokio_test::block_on(context.breaker_summary());
    assert!(summary.starts_with("Circuit Breakers: 0 total"));
}

#[test]
fn test_invalid_configuration_rejected() {
    let mut config = test_config();
    config.orchestration.max_concurrency = 0;

    let error = tokio_test::assert_err!(ServiceContext::from_config(config));
    assert!(matches!(error, CoreError::Configuration(_)));
}
