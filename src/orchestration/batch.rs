//! # Batch Orchestrator
//!
//! Fans a psychologist's bulk decision out over candidates and reduces the
//! per-candidate outcomes into one aggregate. A failing candidate never aborts
//! the batch; only preconditions (empty batch, no test catalog, broker down)
//! fail the whole call.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use futures::{stream, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::assignment::{
    automatic_assignment, manual_assignment, normalize_exam_date, ManualAssignment, TestSelection,
};
use super::OrchestrationError;
use crate::cache::UserDirectory;
use crate::constants::{exchanges, queues, routing_keys};
use crate::coordination::ReferenceDataCoordinator;
use crate::events::payloads::epoch_millis;
use crate::events::{
    AssignmentCompleted, CandidateApproved, CandidateRejected, EventPublisher, EventSubscriber,
    TestAssignment, TestAssignmentNotification, TestCatalog,
};
use crate::gateway::UserProfile;
use crate::messaging::MessagingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOperation {
    Approve,
    Reject,
}

impl FromStr for BatchOperation {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(Self::Approve),
            "rejected" => Ok(Self::Reject),
            other => Err(OrchestrationError::InvalidOperation(other.to_string())),
        }
    }
}

impl fmt::Display for BatchOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approve => write!(f, "approved"),
            Self::Reject => write!(f, "rejected"),
        }
    }
}

/// Who authorized the batch, plus optional data carried into each assignment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchContext {
    pub authorized_by: String,
    pub exam_date: Option<String>,
}

impl BatchContext {
    pub fn authorized_by(authorized_by: impl Into<String>) -> Self {
        Self {
            authorized_by: authorized_by.into(),
            exam_date: None,
        }
    }

    pub fn with_exam_date(mut self, exam_date: impl Into<String>) -> Self {
        self.exam_date = Some(exam_date.into());
        self
    }

    fn normalized(&self) -> Result<Self, OrchestrationError> {
        Ok(Self {
            authorized_by: self.authorized_by.clone(),
            exam_date: self
                .exam_date
                .as_deref()
                .map(normalize_exam_date)
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchResult {
    fn from_outcome(id: String, outcome: Result<(), OrchestrationError>) -> Self {
        match outcome {
            Ok(()) => Self {
                id,
                success: true,
                error: None,
            },
            Err(error) => Self {
                id,
                success: false,
                error: Some(error.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAggregate {
    pub success_count: usize,
    pub total_requested: usize,
}

/// Per-item results in request order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub results: Vec<BatchResult>,
}

impl BatchReport {
    pub fn aggregate(&self) -> BatchAggregate {
        BatchAggregate {
            success_count: self.results.iter().filter(|r| r.success).count(),
            total_requested: self.results.len(),
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &BatchResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

#[derive(Debug, Clone)]
pub struct BatchOrchestrator {
    directory: Arc<dyn UserDirectory>,
    publisher: EventPublisher,
    catalog: ReferenceDataCoordinator<TestCatalog>,
    selection: TestSelection,
    max_concurrency: usize,
}

impl BatchOrchestrator {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        publisher: EventPublisher,
        catalog: ReferenceDataCoordinator<TestCatalog>,
        selection: TestSelection,
        max_concurrency: usize,
    ) -> Self {
        Self {
            directory,
            publisher,
            catalog,
            selection,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn catalog(&self) -> &ReferenceDataCoordinator<TestCatalog> {
        &self.catalog
    }

    pub async fn run_batch(
        &self,
        ids: &[String],
        operation: BatchOperation,
        context: BatchContext,
    ) -> Result<BatchAggregate, OrchestrationError> {
        Ok(self.run_batch_report(ids, operation, context).await?.aggregate())
    }

    pub async fn run_batch_report(
        &self,
        ids: &[String],
        operation: BatchOperation,
        context: BatchContext,
    ) -> Result<BatchReport, OrchestrationError> {
        if ids.is_empty() {
            error!(%operation, "Rejected batch with no user ids");
            return Err(OrchestrationError::EmptyBatch);
        }

        info!(
            %operation,
            count = ids.len(),
            authorized_by = %context.authorized_by,
            exam_date = ?context.exam_date,
            "Processing batch"
        );

        let results = match operation {
            BatchOperation::Approve => self.approve_all(ids, &context).await?,
            BatchOperation::Reject => self.reject_all(ids, &context).await?,
        };

        let report = BatchReport { results };
        for failure in report.failures() {
            warn!(
                %operation,
                user_id = %failure.id,
                error = failure.error.as_deref().unwrap_or_default(),
                "Batch item failed"
            );
        }

        let aggregate = report.aggregate();
        info!(
            %operation,
            success_count = aggregate.success_count,
            total_requested = aggregate.total_requested,
            "Batch completed"
        );
        Ok(report)
    }

    async fn approve_all(
        &self,
        ids: &[String],
        context: &BatchContext,
    ) -> Result<Vec<BatchResult>, OrchestrationError> {
        // A bad exam date would fail every item the same way
        let context = &context.normalized()?;
        let catalog = self.refreshed_catalog().await?;
        let catalog: &TestCatalog = &catalog;
        info!(tests = catalog.len(), "Processing assignments");

        Ok(self
            .fan_out(ids, |user_id| async move {
                self.approve_one(&user_id, catalog, context).await
            })
            .await)
    }

    async fn approve_one(
        &self,
        user_id: &str,
        catalog: &TestCatalog,
        context: &BatchContext,
    ) -> Result<(), OrchestrationError> {
        debug!(user_id, "Processing user for approval");
        let profile = self
            .directory
            .fetch_user(user_id)
            .await?
            .ok_or_else(|| OrchestrationError::user_not_found(user_id))?;

        self.assign_automatically(
            user_id,
            &profile,
            catalog,
            Some(context.authorized_by.clone()),
            context.exam_date.clone(),
        )
        .await
        .map(|_| ())
    }

    async fn reject_all(
        &self,
        ids: &[String],
        context: &BatchContext,
    ) -> Result<Vec<BatchResult>, OrchestrationError> {
        self.publisher
            .connection()
            .ensure_connected()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to establish broker connection for rejections");
                OrchestrationError::BrokerUnavailable(e)
            })?;

        Ok(self
            .fan_out(ids, |user_id| async move {
                let event = CandidateRejected::new(&user_id, &context.authorized_by);
                self.publisher
                    .publish_event(
                        exchanges::USER_EVENTS,
                        routing_keys::CANDIDATE_REJECTED,
                        &event,
                    )
                    .await?;
                info!(user_id = %user_id, "Rejection published");
                Ok(())
            })
            .await)
    }

    async fn fan_out<F, Fut>(&self, ids: &[String], work: F) -> Vec<BatchResult>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<(), OrchestrationError>>,
    {
        stream::iter(ids.iter().cloned())
            .map(|id| {
                let pending = work(id.clone());
                async move { BatchResult::from_outcome(id, pending.await) }
            })
            .buffered(self.max_concurrency)
            .collect()
            .await
    }

    /// Assigns tests chosen by a psychologist to one candidate. The catalog is
    /// only refreshed when nothing is cached or the cached copy has expired.
    pub async fn assign_manually(
        &self,
        user_id: &str,
        request: ManualAssignment,
        assigned_by: &str,
    ) -> Result<TestAssignment, OrchestrationError> {
        let profile = self
            .directory
            .fetch_user(user_id)
            .await?
            .ok_or_else(|| OrchestrationError::user_not_found(user_id))?;

        let catalog = self.cached_catalog().await?;
        let assignment = manual_assignment(&catalog, &request, assigned_by)?;
        self.publish_assignment(user_id, &profile, assignment.clone(), None)
            .await?;
        info!(user_id, assigned_by, "Manual test assignment completed");
        Ok(assignment)
    }

    /// Assigns a test to one candidate approved outside a batch
    pub async fn handle_candidate_approved(
        &self,
        event: CandidateApproved,
    ) -> Result<TestAssignment, OrchestrationError> {
        info!(user_id = %event.user_id, "Received candidate approval");
        let catalog = self.cached_catalog().await?;
        self.assign_automatically(
            &event.user_id,
            &event.profile(),
            &catalog,
            event.authorized_by_id.clone(),
            event.exam_date(),
        )
        .await
    }

    /// Consumes `candidate.approved`; failures dead-letter the event
    pub async fn attach_consumers(&self, subscriber: &EventSubscriber) -> Result<(), MessagingError> {
        let orchestrator = self.clone();
        subscriber
            .on_event(
                queues::CANDIDATE_APPROVED,
                exchanges::USER_EVENTS,
                routing_keys::CANDIDATE_APPROVED,
                move |event: CandidateApproved| {
                    let orchestrator = orchestrator.clone();
                    async move {
                        orchestrator
                            .handle_candidate_approved(event)
                            .await
                            .map(|_| ())
                            .map_err(anyhow::Error::from)
                    }
                },
            )
            .await
    }

    async fn cached_catalog(&self) -> Result<Arc<TestCatalog>, OrchestrationError> {
        match self.catalog.unexpired().filter(|catalog| !catalog.is_empty()) {
            Some(catalog) => Ok(catalog),
            None => {
                info!("Test catalog missing or expired, requesting test list");
                self.refreshed_catalog().await
            }
        }
    }

    async fn refreshed_catalog(&self) -> Result<Arc<TestCatalog>, OrchestrationError> {
        let outcome = self.catalog.refresh().await;
        if !outcome.fresh {
            warn!("Test catalog reply not received, using cached catalog if any");
        }
        outcome
            .data
            .filter(|catalog| !catalog.is_empty())
            .ok_or_else(|| {
                error!("No tests available after waiting for test list response");
                OrchestrationError::NoTestsAvailable
            })
    }

    async fn assign_automatically(
        &self,
        user_id: &str,
        profile: &UserProfile,
        catalog: &TestCatalog,
        assigned_by: Option<String>,
        exam_date: Option<String>,
    ) -> Result<TestAssignment, OrchestrationError> {
        let test_name = self.selection.test_for(profile.education_level.as_deref());
        let assignment = automatic_assignment(catalog, test_name, assigned_by, exam_date)?;
        self.publish_assignment(user_id, profile, assignment.clone(), Some("approved"))
            .await?;
        info!(user_id, test = %assignment.assigned_test, "Test assignment completed");
        Ok(assignment)
    }

    // The assignment event is the record of truth and must succeed. The email
    // notification is best effort.
    async fn publish_assignment(
        &self,
        user_id: &str,
        profile: &UserProfile,
        assignment: TestAssignment,
        status_update: Option<&str>,
    ) -> Result<(), OrchestrationError> {
        let completed = AssignmentCompleted {
            user_id: user_id.to_string(),
            test_assignment: assignment.clone(),
            timestamp: epoch_millis(),
            status_update: status_update.map(str::to_string),
        };
        self.publisher
            .publish_event(
                exchanges::ASSIGNMENT_EVENTS,
                routing_keys::ASSIGNMENT_COMPLETED,
                &completed,
            )
            .await?;

        let notification = TestAssignmentNotification::for_profile(profile, assignment);
        match self
            .publisher
            .publish_event(
                exchanges::NOTIFICATION_EVENTS,
                routing_keys::NOTIFICATION_TEST_ASSIGNMENT,
                &notification,
            )
            .await
        {
            Ok(()) => debug!(user_id, "Published test assignment notification"),
            Err(e) => warn!(user_id, error = %e, "Failed to publish test assignment notification"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_parsing() {
        assert_eq!("approved".parse::<BatchOperation>().unwrap(), BatchOperation::Approve);
        assert_eq!("rejected".parse::<BatchOperation>().unwrap(), BatchOperation::Reject);
        assert!(matches!(
            "pending".parse::<BatchOperation>(),
            Err(OrchestrationError::InvalidOperation(s)) if s == "pending"
        ));
        assert_eq!(BatchOperation::Approve.to_string(), "approved");
    }

    #[test]
    fn test_report_aggregate() {
        let report = BatchReport {
            results: vec![
                BatchResult::from_outcome("a".into(), Ok(())),
                BatchResult::from_outcome("b".into(), Err(OrchestrationError::user_not_found("b"))),
                BatchResult::from_outcome("c".into(), Ok(())),
            ],
        };

        assert_eq!(
            report.aggregate(),
            BatchAggregate {
                success_count: 2,
                total_requested: 3
            }
        );
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error.as_deref(), Some("Failed to fetch user data for b"));
    }

    #[test]
    fn test_aggregate_wire_shape() {
        let value = serde_json::to_value(BatchAggregate {
            success_count: 4,
            total_requested: 5,
        })
        .unwrap();
        assert_eq!(value, serde_json::json!({"successCount": 4, "totalRequested": 5}));
    }
}
