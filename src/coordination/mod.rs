//! # Coordination
//!
//! Asynchronous request/reply for shared reference data.

pub mod catalog_responder;
pub mod reference_data;

pub use catalog_responder::CatalogResponder;
pub use reference_data::{ReferenceDataCoordinator, ReferenceOutcome};
