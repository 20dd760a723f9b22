//! Test assignment decisions.
//!
//! Automatic assignments pick a test from the candidate's education level.
//! Manual assignments take explicit test ids chosen by a psychologist; unknown
//! additional ids are dropped, an unknown primary id is an error.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::OrchestrationError;
use crate::config::OrchestrationConfig;
use crate::constants::LOW_EDUCATION_LEVELS;
use crate::events::{TestAssignment, TestCatalog};

/// Case-insensitive substring match against the low education levels, so
/// "Some_College (2 years)" counts as low
pub fn is_low_education(education_level: Option<&str>) -> bool {
    let level = education_level.unwrap_or_default().to_lowercase();
    LOW_EDUCATION_LEVELS.iter().any(|low| level.contains(low))
}

/// Maps education levels to test names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSelection {
    low_level_test: String,
    high_level_test: String,
}

impl TestSelection {
    pub fn new(low_level_test: impl Into<String>, high_level_test: impl Into<String>) -> Self {
        Self {
            low_level_test: low_level_test.into(),
            high_level_test: high_level_test.into(),
        }
    }

    pub fn from_config(config: &OrchestrationConfig) -> Self {
        Self::new(&config.low_level_test, &config.high_level_test)
    }

    pub fn test_for(&self, education_level: Option<&str>) -> &str {
        if is_low_education(education_level) {
            &self.low_level_test
        } else {
            &self.high_level_test
        }
    }
}

impl Default for TestSelection {
    fn default() -> Self {
        Self::from_config(&OrchestrationConfig::default())
    }
}

/// A psychologist's explicit choice of tests
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualAssignment {
    pub assigned_test_id: String,
    #[serde(default)]
    pub additional_test_ids: Vec<String>,
    #[serde(default)]
    pub exam_date: Option<String>,
}

pub fn automatic_assignment(
    catalog: &TestCatalog,
    test_name: &str,
    assigned_by: Option<String>,
    exam_date: Option<String>,
) -> Result<TestAssignment, OrchestrationError> {
    let test = catalog
        .find_by_name(test_name)
        .ok_or_else(|| OrchestrationError::UnknownTest {
            name: test_name.to_string(),
        })?;
    let exam_date = exam_date.as_deref().map(normalize_exam_date).transpose()?;

    Ok(TestAssignment {
        assigned_test: test.name.clone(),
        assigned_test_id: test.id.clone(),
        additional_tests: Vec::new(),
        additional_test_ids: Vec::new(),
        is_manual_assignment: false,
        assignment_date: Utc::now(),
        assigned_by,
        exam_date,
    })
}

pub fn manual_assignment(
    catalog: &TestCatalog,
    request: &ManualAssignment,
    assigned_by: &str,
) -> Result<TestAssignment, OrchestrationError> {
    let primary = catalog
        .find_by_id(&request.assigned_test_id)
        .ok_or_else(|| OrchestrationError::UnknownTestId {
            test_id: request.assigned_test_id.clone(),
        })?;

    let (additional_tests, additional_test_ids) = request
        .additional_test_ids
        .iter()
        .filter_map(|id| catalog.find_by_id(id))
        .map(|test| (test.name.clone(), test.id.clone()))
        .unzip();

    let exam_date = request
        .exam_date
        .as_deref()
        .map(normalize_exam_date)
        .transpose()?;

    Ok(TestAssignment {
        assigned_test: primary.name.clone(),
        assigned_test_id: primary.id.clone(),
        additional_tests,
        additional_test_ids,
        is_manual_assignment: true,
        assignment_date: Utc::now(),
        assigned_by: Some(assigned_by.to_string()),
        exam_date,
    })
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC) and
/// returns a UTC timestamp with millisecond precision
pub fn normalize_exam_date(raw: &str) -> Result<String, OrchestrationError> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Millis, true));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| {
            midnight
                .and_utc()
                .to_rfc3339_opts(SecondsFormat::Millis, true)
        })
        .ok_or_else(|| OrchestrationError::InvalidExamDate(raw.to_string()))
}
