//! # Structured Logging
//!
//! Subscriber setup plus the span macro used by the request pipeline.
//!
//! `RUST_LOG`, when set, always wins over the configured level so a single
//! noisy dependency can be silenced without touching service configuration.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, LoggingConfig};
use crate::errors::{Error, Result};

/// Create a tracing span for request tracking.
///
/// ```rust,ignore
/// let span = request_span!("GET", "/ping");
/// let span = request_span!("POST", "/orders", remote = %addr);
/// ```
#[macro_export]
macro_rules! request_span {
    ($method:expr, $path:expr) => {
        tracing::info_span!(
            "http_request",
            method = %$method,
            path = %$path,
            request_id = %uuid::Uuid::new_v4()
        )
    };
    ($method:expr, $path:expr, $($field:tt)*) => {
        tracing::info_span!(
            "http_request",
            method = %$method,
            path = %$path,
            request_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Filter directive for the configured environment.
pub fn logging_filter(config: &LoggingConfig) -> String {
    if config.environment.is_development() {
        "trace".to_string()
    } else {
        config.level.to_lowercase()
    }
}

/// Install the global subscriber.
///
/// Fails if a global subscriber is already installed (a second call, or a
/// host application that configured its own).
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(logging_filter(config))
            .map_err(|e| Error::config(format!("Invalid TRACE_LEVEL '{}': {}", config.level, e)))?,
    };

    let installed = if config.environment.is_development() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty().with_target(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(false),
            )
            .try_init()
    };

    installed.map_err(|e| Error::internal(format!("Logging is already initialised: {}", e)))
}

/// Log configuration at startup
pub fn log_config_info(config: &Config) {
    tracing::info!(
        service = %config.service.name,
        namespace = %config.service.namespace,
        version = %config.service.version,
        environment = config.environment.as_str(),
        listen_address = %config.api.socket_address(),
        secret_service = %config.secrets.vault.address,
        ping_requires_access_key = config.api.ping_requires_access_key,
        "Service runtime configuration"
    );
}
