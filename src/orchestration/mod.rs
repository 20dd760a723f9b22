//! # Orchestration
//!
//! Bulk approval and rejection of candidates, manual test assignment, and the
//! consumer for single-candidate approvals.

pub mod assignment;
pub mod batch;
pub mod error;

pub use assignment::{is_low_education, ManualAssignment, TestSelection};
pub use batch::{
    BatchAggregate, BatchContext, BatchOperation, BatchOrchestrator, BatchReport, BatchResult,
};
pub use error::OrchestrationError;
