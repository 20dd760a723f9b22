//! # Resilient Call Gateway
//!
//! Synchronous outbound calls to peer services, each wrapped in a timeout and a
//! rolling-window circuit breaker keyed by operation name.

pub mod classification;
pub mod resilient;
pub mod user_service;

pub use classification::{classify_status, CallError};
pub use resilient::{GatewayError, ResilientGateway};
pub use user_service::{
    CredentialCheck, TestEligibilityInfo, TokenRevocation, UserProfile, UserServiceClient,
};
