//! Event bodies exchanged with the other platform services.
//!
//! Field names are camelCase on the wire. Timestamps named `timestamp` are
//! Unix epoch milliseconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::NOT_SPECIFIED;
use crate::gateway::{TestEligibilityInfo, UserProfile};

pub fn epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Optional data attached to an approval
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalAdditionalData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_date: Option<String>,
}

/// `user.candidate.approved`, published by user management when a
/// psychologist approves a single candidate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateApproved {
    pub user_id: String,
    #[serde(default)]
    pub education_level: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub authorized_by_id: Option<String>,
    #[serde(default)]
    pub additional_data: Option<ApprovalAdditionalData>,
    #[serde(default)]
    pub test_eligibility_info: Option<TestEligibilityInfo>,
    #[serde(default)]
    pub job_position: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
}

impl CandidateApproved {
    /// Candidate view of the event, shaped like a fetched profile
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: Some(self.user_id.clone()),
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            education_level: self.education_level.clone(),
            job_position: self.job_position.clone(),
            company: self.company.clone(),
            test_eligibility_info: self.test_eligibility_info.clone(),
        }
    }

    pub fn exam_date(&self) -> Option<String> {
        self.additional_data
            .as_ref()
            .and_then(|data| data.exam_date.clone())
    }
}

/// `user.candidate.rejected`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRejected {
    pub user_id: String,
    pub authorized_by_id: String,
    pub status: String,
    pub timestamp: i64,
}

impl CandidateRejected {
    pub fn new(user_id: impl Into<String>, authorized_by_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            authorized_by_id: authorized_by_id.into(),
            status: "rejected".to_string(),
            timestamp: epoch_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestAssignment {
    pub assigned_test: String,
    pub assigned_test_id: String,
    pub additional_tests: Vec<String>,
    pub additional_test_ids: Vec<String>,
    pub is_manual_assignment: bool,
    pub assignment_date: DateTime<Utc>,
    pub assigned_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_date: Option<String>,
}

/// `test.assignment.completed`, consumed by user management to record the
/// assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentCompleted {
    pub user_id: String,
    pub test_assignment: TestAssignment,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_update: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecipient {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub test_assignment: TestAssignment,
    pub test_eligibility_info: TestEligibilityInfo,
}

/// `notification.email.test_assignment`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestAssignmentNotification {
    pub user: NotificationRecipient,
}

impl TestAssignmentNotification {
    /// Uses the profile's eligibility block when present, otherwise builds one
    /// from the flat job fields with "Not specified" fallbacks
    pub fn for_profile(profile: &UserProfile, test_assignment: TestAssignment) -> Self {
        let test_eligibility_info = profile.test_eligibility_info.clone().unwrap_or_else(|| {
            TestEligibilityInfo {
                job_position: Some(
                    profile
                        .job_position
                        .clone()
                        .unwrap_or_else(|| NOT_SPECIFIED.to_string()),
                ),
                company: Some(
                    profile
                        .company
                        .clone()
                        .unwrap_or_else(|| NOT_SPECIFIED.to_string()),
                ),
            }
        });

        Self {
            user: NotificationRecipient {
                email: profile.email.clone(),
                first_name: profile.first_name.clone(),
                last_name: profile.last_name.clone(),
                test_assignment,
                test_eligibility_info,
            },
        }
    }
}

/// `test.list.request`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestListRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    #[serde(default)]
    pub timestamp: i64,
}

impl TestListRequest {
    pub fn correlated(correlation_id: Uuid) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            timestamp: epoch_millis(),
        }
    }
}

/// One active psychometric test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDefinition {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub test_type: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub duration: Option<u32>,
}

impl TestDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            test_type: None,
            category: None,
            difficulty: None,
            duration: None,
        }
    }
}

/// The active test catalog, the body of `test.list.response`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestCatalog {
    #[serde(default)]
    pub tests: Vec<TestDefinition>,
}

impl TestCatalog {
    pub fn new(tests: Vec<TestDefinition>) -> Self {
        Self { tests }
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn find_by_name(&self, name: &str) -> Option<&TestDefinition> {
        self.tests.iter().find(|test| test.name == name)
    }

    pub fn find_by_id(&self, id: &str) -> Option<&TestDefinition> {
        self.tests.iter().find(|test| test.id == id)
    }
}

/// A reference-data reply. The correlation id is echoed by responders that
/// support it and absent otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceReply<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(flatten)]
    pub data: T,
}

impl<T> ReferenceReply<T> {
    pub fn new(correlation_id: Option<Uuid>, data: T) -> Self {
        Self {
            correlation_id,
            timestamp: epoch_millis(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_catalog_reply_without_correlation_id() {
        let raw = json!({
            "tests": [
                {"_id": "t1", "name": "D-70", "type": "logic", "duration": 30},
                {"_id": "t2", "name": "D-2000"}
            ],
            "timestamp": 1_700_000_000_000_i64
        });

        let reply: ReferenceReply<TestCatalog> = serde_json::from_value(raw).unwrap();
        assert_eq!(reply.correlation_id, None);
        assert_eq!(reply.data.len(), 2);
        assert_eq!(reply.data.find_by_name("D-2000").unwrap().id, "t2");
        assert_eq!(reply.data.find_by_id("t1").unwrap().test_type.as_deref(), Some("logic"));
    }

    #[test]
    fn test_notification_falls_back_to_not_specified() {
        let profile = UserProfile {
            email: Some("ada@example.com".to_string()),
            company: Some("Acme".to_string()),
            ..Default::default()
        };
        let assignment = TestAssignment {
            assigned_test: "D-70".to_string(),
            assigned_test_id: "t1".to_string(),
            additional_tests: vec![],
            additional_test_ids: vec![],
            is_manual_assignment: false,
            assignment_date: Utc::now(),
            assigned_by: Some("psy-1".to_string()),
            exam_date: None,
        };

        let notification = TestAssignmentNotification::for_profile(&profile, assignment);
        let value = serde_json::to_value(&notification).unwrap();

        assert_eq!(value["user"]["testEligibilityInfo"]["jobPosition"], "Not specified");
        assert_eq!(value["user"]["testEligibilityInfo"]["company"], "Acme");
        assert_eq!(value["user"]["testAssignment"]["assignedTest"], "D-70");
        assert!(value["user"]["testAssignment"].get("examDate").is_none());
    }

    #[test]
    fn test_rejection_wire_shape() {
        let event = CandidateRejected::new("u1", "psy-1");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["userId"], "u1");
        assert_eq!(value["authorizedById"], "psy-1");
        assert_eq!(value["status"], "rejected");
        assert!(value["timestamp"].as_i64().unwrap() > 0);
    }
}
