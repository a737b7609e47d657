//! # Keystone
//!
//! Shared runtime for a family of small HTTPS microservices. Every service
//! built on it gets the same three pieces:
//!
//! - **Secret store**: approle login against the central secret service,
//!   one bulk load of the shared and namespace scopes, cache-only reads.
//! - **Service runtime**: an HTTPS listener built from TLS material held in
//!   the secret store, a fixed middleware pipeline ending in an access-key
//!   gate, and a single fatal-shutdown choke point.
//! - **Scheduler**: daily one-shot jobs re-armed by a 03:00 reset timer.
//!
//! ```text
//! ServiceRuntime::start ─► SecretStore::open ─► create_listener ─► listen
//!                 Scheduler::activate_schedules (independent, wall-clock driven)
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use keystone::{secrets::VaultConnector, Config, Result, ServiceRuntime};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::from_env()?;
//!     let connector = Arc::new(VaultConnector::new(config.secrets.vault.clone())?);
//!     let runtime = Arc::new(ServiceRuntime::new(config, connector));
//!     runtime.start().await?;
//!     runtime.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod errors;
pub mod observability;
pub mod runtime;
pub mod scheduler;
pub mod secrets;

pub use config::{Config, Environment, ServiceOptions};
pub use errors::{Error, Result};
pub use runtime::{ServiceRuntime, ServiceState, ShutdownHook};
pub use scheduler::{ScheduleEntry, Scheduler};
pub use secrets::{SecretStore, SecretString};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
