//! Secret service contract and the typed factory used to reach it.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::Result;
use super::types::SecretString;

/// Seal state reported by the secret service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealStatus {
    pub sealed: bool,
}

/// Result of a completed login exchange.
///
/// A session whose store reported `sealed = true` is unusable; the store never
/// builds one, it fails with [`SecretsError::Sealed`](super::SecretsError::Sealed) instead.
#[derive(Debug, Clone)]
pub struct VaultSession {
    pub token: SecretString,
    pub sealed: bool,
}

/// Operations consumed from the central secret service.
///
/// Scopes are the path segment under the configured mount (`common`, the
/// service namespace, `localhost`). Implementations MUST NOT log secret values.
#[async_trait]
pub trait SecretService: Send + Sync {
    /// Current seal state.
    async fn status(&self) -> Result<SealStatus>;

    /// Approle login: exchange a role identifier and secret token for a
    /// short-lived session token.
    async fn authenticate(&self, role_id: &str, secret_id: &SecretString) -> Result<SecretString>;

    /// Keys stored under `scope`.
    async fn list(&self, scope: &str) -> Result<Vec<String>>;

    /// Value stored at `scope/key`.
    async fn read(&self, scope: &str, key: &str) -> Result<SecretString>;

    /// Store `value` at `scope/key`.
    async fn write(&self, scope: &str, key: &str, value: &str) -> Result<()>;
}

/// Factory for [`SecretService`] connections.
///
/// `connect(None)` yields an unauthenticated client (enough for `status` and
/// `authenticate`); `connect(Some(token))` yields a client carrying the session
/// token. Alternate backends plug in here without touching callers.
pub trait SecretServiceConnector: Send + Sync {
    fn connect(&self, token: Option<&SecretString>) -> Result<Arc<dyn SecretService>>;

    /// Human readable backend name for logs.
    fn backend_name(&self) -> &'static str;
}
