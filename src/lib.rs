#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Recruit Core
//!
//! Resilience and asynchronous-coordination layer shared by the recruitment platform
//! services. Independently deployed services use it to call each other safely and to
//! coordinate multi-step workflows without a shared transaction.
//!
//! ## Module Organization
//!
//! - [`resilience`] - Rolling-window circuit breakers and their registry
//! - [`gateway`] - Breaker-protected outbound calls and the user service client
//! - [`cache`] - Read-through TTL cache in front of the gateway
//! - [`messaging`] - Broker providers, declarative topology and the connection manager
//! - [`events`] - Typed publish/subscribe helpers and event payloads
//! - [`coordination`] - Request/reply over pub/sub for shared reference data
//! - [`orchestration`] - Batch fan-out with per-item failure isolation
//! - [`context`] - Dependency container wiring all of the above
//! - [`config`] - Layered configuration loading
//! - [`logging`] - Tracing subscriber setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use recruit_core::config::ConfigLoader;
//! use recruit_core::context::ServiceContext;
//! use recruit_core::orchestration::{BatchContext, BatchOperation};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! recruit_core::logging::init_tracing();
//! let config = ConfigLoader::load()?;
//! let context = ServiceContext::from_config(config)?;
//! context.start_consumers().await?;
//!
//! let aggregate = context
//!     .orchestrator
//!     .run_batch(
//!         &["user-1".to_string(), "user-2".to_string()],
//!         "approved".parse::<BatchOperation>()?,
//!         BatchContext::authorized_by("psychologist-7"),
//!     )
//!     .await?;
//! println!("{}/{} succeeded", aggregate.success_count, aggregate.total_requested);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod constants;
pub mod context;
pub mod coordination;
pub mod error;
pub mod events;
pub mod gateway;
pub mod logging;
pub mod messaging;
pub mod orchestration;
pub mod resilience;

pub use error::{CoreError, CoreResult};
