//! # Tracing Module
//!
//! Environment-aware console logging using the tracing ecosystem. Logs go to stdout
//! so containerized deployments can collect them without extra plumbing.
//!
//! Level resolution, first match wins:
//!
//! 1. `RUST_LOG` (full `EnvFilter` directive syntax)
//! 2. `RECRUIT_LOG_LEVEL`
//! 3. Environment default: `debug` in development, `warn` in test, `info` otherwise
//!
//! Set `RECRUIT_LOG_FORMAT=json` for one JSON object per line.

use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the global tracing subscriber.
///
/// Safe to call more than once and safe to call when another subscriber was
/// installed first (tests commonly do this); later calls are no-ops.
pub fn init_tracing() {
    TRACING_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let json = use_json_format();

        // Determine if we're in a TTY for ANSI color support
        let use_ansi = IsTerminal::is_terminal(&std::io::stdout());

        let console_layer = if json {
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_filter(EnvFilter::new(&log_level))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(use_ansi)
                .with_filter(EnvFilter::new(&log_level))
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(console_layer);

        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        } else {
            tracing::info!(
                environment = %environment,
                ansi_colors = use_ansi,
                json_format = json,
                "Console logging initialized"
            );
        }
    });
}

/// Current deployment environment name
pub fn get_environment() -> String {
    std::env::var("RECRUIT_ENV")
        .or_else(|_| std::env::var("NODE_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> String {
    if let Ok(filter) = std::env::var("RUST_LOG") {
        return filter;
    }

    if let Ok(level) = std::env::var("RECRUIT_LOG_LEVEL") {
        return level.to_lowercase();
    }

    default_level_for(environment).to_string()
}

fn default_level_for(environment: &str) -> &'static str {
    match environment {
        "development" => "debug",
        "test" => "warn",
        _ => "info",
    }
}

fn use_json_format() -> bool {
    std::env::var("RECRUIT_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}
