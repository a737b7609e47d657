//! Secret store for service bootstrap material.
//!
//! A service loads every credential it needs (TLS pair, client access key,
//! database URL, third-party API keys) once at startup from the central secret
//! service and reads them from memory afterwards.
//!
//! # Architecture
//!
//! - [`SecretService`]: the narrow contract consumed from the secret service
//!   (`status`, `authenticate`, `list`, `read`, `write`).
//! - [`SecretServiceConnector`]: typed factory that hands out unauthenticated or
//!   session-bearing [`SecretService`] connections.
//! - [`SecretStore`]: login + bulk load into a [`SecretCache`], cache-only
//!   [`SecretStore::get`], write-through [`SecretStore::update`].
//!
//! # Supported Backends
//!
//! - **HashiCorp Vault** ([`VaultConnector`]): KV v2 + approle login
//! - **In-memory** ([`InMemoryConnector`]): development and tests
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use keystone::secrets::{SecretStore, SecretStoreSettings, VaultConfig, VaultConnector};
//!
//! let connector = VaultConnector::new(VaultConfig::default())?;
//! let store = SecretStore::new(Arc::new(connector), SecretStoreSettings::new("weather"));
//! store.open().await?;
//! let key = store.get("ClientAccessKey")?;
//! ```

pub mod client;
pub mod error;
pub mod memory;
pub mod store;
pub mod types;
pub mod vault;

pub use client::{SealStatus, SecretService, SecretServiceConnector, VaultSession};
pub use error::{Result, SecretsError};
pub use memory::{CallCounts, InMemoryConnector, InMemorySecretService};
pub use store::{SecretCache, SecretStore, SecretStoreSettings, LOCAL_SCOPE_KEYS};
pub use types::SecretString;
pub use vault::{VaultConfig, VaultConnector, VaultSecretService};
