//! # Events
//!
//! Typed JSON publish/subscribe on top of [`crate::messaging::ConnectionManager`],
//! plus the event bodies shared with the other platform services.

pub mod payloads;
pub mod publisher;
pub mod subscriber;

pub use payloads::{
    AssignmentCompleted, CandidateApproved, CandidateRejected, ReferenceReply, TestAssignment,
    TestAssignmentNotification, TestCatalog, TestDefinition, TestListRequest,
};
pub use publisher::EventPublisher;
pub use subscriber::EventSubscriber;
