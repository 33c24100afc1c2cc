//! # Structured Logging Module
//!
//! Environment-aware console logging built on `tracing`. Matrix runs are usually
//! driven from a terminal or a CI job, so output goes to stdout with ANSI colors only
//! when attached to a TTY, and can be switched to JSON lines for log collectors.

use crate::constants::env;
use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let json = use_json_format();
        let use_ansi = std::io::stdout().is_terminal();

        let console_layer = if json {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .json()
                .with_filter(EnvFilter::new(&log_level))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(use_ansi)
                .with_filter(EnvFilter::new(&log_level))
                .boxed()
        };

        if tracing_subscriber::registry()
            .with(console_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        } else {
            tracing::info!(
                environment = %environment,
                log_level = %log_level,
                json,
                "Structured logging initialized"
            );
        }
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var(env::ENVIRONMENT)
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level: `RUST_LOG` wins, then the explicit override, then the environment default
fn get_log_level(environment: &str) -> String {
    if let Ok(filter) = std::env::var("RUST_LOG") {
        if !filter.trim().is_empty() {
            return filter;
        }
    }
    if let Ok(level) = std::env::var(env::LOG_LEVEL) {
        return level.to_lowercase();
    }

    match environment {
        "test" => "debug".to_string(),
        "development" => "debug".to_string(),
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

fn use_json_format() -> bool {
    std::env::var(env::LOG_FORMAT)
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Log matrix-level operations (catalog, cache, iteration lifecycle)
#[macro_export]
macro_rules! log_matrix {
    // Full form with build version
    ($level:ident, $operation:expr, version: $version:expr, $($key:ident: $value:expr),* $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            version = %$version,
            $($key = ?$value,)*
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "MATRIX_{} (version: {})", $operation, $version
        );
    };
    // Simple form - just operation
    ($level:ident, $operation:expr $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "MATRIX_{}", $operation
        );
    };
    // Generic form with additional fields
    ($level:ident, $operation:expr, $($key:ident: $value:expr),+ $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            $($key = ?$value,)*
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "MATRIX_{}", $operation
        );
    };
}

/// Log service lifecycle operations (launch, readiness, stop)
#[macro_export]
macro_rules! log_service {
    ($level:ident, $operation:expr, service: $service:expr, $($key:ident: $value:expr),* $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            service = %$service,
            $($key = ?$value,)*
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "SERVICE_{} ({})", $operation, $service
        );
    };
    ($level:ident, $operation:expr, service: $service:expr $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            service = %$service,
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "SERVICE_{} ({})", $operation, $service
        );
    };
}
