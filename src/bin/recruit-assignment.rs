//! # Recruit Assignment Service
//!
//! Runs the candidate approval consumer and the test catalog reply consumer
//! against the configured broker until Ctrl+C or SIGTERM.
//!
//! ## Usage
//!
//! ```bash
//! # Run with configuration from config/recruit.toml and RECRUIT_* variables
//! cargo run --bin recruit-assignment
//!
//! # Also answer test list requests with the built-in catalog
//! cargo run --bin recruit-assignment -- --serve-catalog
//! ```

use std::env;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};

use recruit_core::config::ConfigLoader;
use recruit_core::constants::test_names;
use recruit_core::context::ServiceContext;
use recruit_core::events::{TestCatalog, TestDefinition};
use recruit_core::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    info!("🚀 Starting Recruit Assignment Service...");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));

    let serve_catalog = env::args().skip(1).any(|arg| arg == "--serve-catalog");

    let config = ConfigLoader::load().context("failed to load configuration")?;
    info!("   Environment: {}", config.environment);

    let context =
        ServiceContext::from_config(config).context("failed to build service context")?;
    context
        .start_consumers()
        .await
        .context("failed to start message consumers")?;

    let _responder = if serve_catalog {
        Some(
            context
                .serve_catalog(builtin_catalog())
                .await
                .context("failed to start catalog responder")?,
        )
    } else {
        None
    };

    info!("🎉 Recruit Assignment Service started");
    info!("   Press Ctrl+C to shutdown gracefully");

    shutdown_signal().await;

    info!("🛑 Shutdown signal received, initiating graceful shutdown...");
    info!("{}", context.breaker_summary().await);
    context.shutdown().await;
    info!("👋 Recruit Assignment Service shutdown complete");

    Ok(())
}

fn builtin_catalog() -> TestCatalog {
    let mut d70 = TestDefinition::new("d70", test_names::LOW_LEVEL);
    d70.category = Some("logical".to_string());
    d70.duration = Some(25);
    let mut d2000 = TestDefinition::new("d2000", test_names::HIGH_LEVEL);
    d2000.category = Some("logical".to_string());
    d2000.duration = Some(40);
    let mut logic = TestDefinition::new("logique", test_names::LOGIC);
    logic.category = Some("reasoning".to_string());
    logic.duration = Some(30);
    TestCatalog::new(vec![d70, d2000, logic])
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}
