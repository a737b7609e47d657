//! The secret store: login, bulk load into an in-memory cache, cache-only reads.
//!
//! [`SecretStore::open`] performs the whole exchange with the secret service
//! (seal check, approle login, authenticated reconnect, list + read of the
//! shared and namespace scopes) and swaps a fully populated [`SecretCache`] in
//! at the end. [`SecretStore::get`] never leaves the process.
//!
//! No retries or backoff anywhere: a failure is returned immediately and the
//! runtime decides whether it is fatal.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::client::{SecretService, SecretServiceConnector, VaultSession};
use super::error::{Result, SecretsError};
use super::types::SecretString;

/// Keys pulled from the local scope when running in development mode.
pub const LOCAL_SCOPE_KEYS: [&str; 3] = ["ssl_key", "ssl_cert", "DataBaseURL"];

/// Where and as whom the store loads secrets.
#[derive(Debug, Clone)]
pub struct SecretStoreSettings {
    /// Service namespace; its scope wins over the shared scope on key collision.
    pub namespace: String,
    /// Scope shared by every service.
    pub common_scope: String,
    /// Scope holding developer-machine material.
    pub local_scope: String,
    pub role_id: String,
    pub secret_id: SecretString,
    /// Load [`LOCAL_SCOPE_KEYS`] from `local_scope` after the regular scopes.
    pub load_local_scope: bool,
}

impl SecretStoreSettings {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            common_scope: "common".to_string(),
            local_scope: "localhost".to_string(),
            role_id: String::new(),
            secret_id: SecretString::default(),
            load_local_scope: false,
        }
    }

    pub fn with_credentials(mut self, role_id: impl Into<String>, secret_id: SecretString) -> Self {
        self.role_id = role_id.into();
        self.secret_id = secret_id;
        self
    }

    pub fn with_common_scope(mut self, scope: impl Into<String>) -> Self {
        self.common_scope = scope.into();
        self
    }

    pub fn with_local_scope(mut self, scope: impl Into<String>, load: bool) -> Self {
        self.local_scope = scope.into();
        self.load_local_scope = load;
        self
    }
}

/// Immutable `key -> value` snapshot produced by one `open`.
#[derive(Debug, Clone, Default)]
pub struct SecretCache {
    entries: HashMap<String, SecretString>,
}

impl SecretCache {
    pub fn get(&self, key: &str) -> Option<&SecretString> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted key names; values are never exposed.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Later inserts override earlier ones, which is what gives the namespace
    /// scope precedence over the shared scope.
    fn insert(&mut self, key: String, value: SecretString) -> bool {
        self.entries.insert(key, value).is_some()
    }
}

/// Secret store backed by any [`SecretServiceConnector`].
pub struct SecretStore {
    connector: Arc<dyn SecretServiceConnector>,
    settings: SecretStoreSettings,
    cache: RwLock<Option<Arc<SecretCache>>>,
    open_lock: Mutex<()>,
}

impl SecretStore {
    pub fn new(connector: Arc<dyn SecretServiceConnector>, settings: SecretStoreSettings) -> Self {
        Self { connector, settings, cache: RwLock::new(None), open_lock: Mutex::new(()) }
    }

    pub fn settings(&self) -> &SecretStoreSettings {
        &self.settings
    }

    pub fn namespace(&self) -> &str {
        &self.settings.namespace
    }

    /// Connect, verify the service is unsealed, log in and reconnect with the
    /// session token.
    async fn login(&self) -> Result<Arc<dyn SecretService>> {
        debug!(backend = self.connector.backend_name(), "Connecting to secret service");
        let anonymous = self.connector.connect(None)?;

        debug!("Checking secret service seal status");
        let status = anonymous.status().await?;
        if status.sealed {
            tracing::error!("Secret service is sealed");
            return Err(SecretsError::Sealed);
        }

        let token = anonymous.authenticate(&self.settings.role_id, &self.settings.secret_id).await?;
        let session = VaultSession { token, sealed: status.sealed };

        self.connector.connect(Some(&session.token))
    }

    async fn load_scope(
        &self,
        session: &dyn SecretService,
        scope: &str,
        cache: &mut SecretCache,
    ) -> Result<usize> {
        let keys = session.list(scope).await?;
        for key in &keys {
            let value = session.read(scope, key).await?;
            if cache.insert(key.clone(), value) {
                debug!(scope = %scope, key = %key, "Secret overrides shared value");
            }
        }
        Ok(keys.len())
    }

    /// Load every secret of the shared and namespace scopes into a fresh cache.
    ///
    /// Concurrent calls are serialised. The cache visible to [`get`](Self::get)
    /// is replaced only once the new one is complete; on error the previous
    /// cache (if any) stays in place.
    pub async fn open(&self) -> Result<()> {
        let _guard = self.open_lock.lock().await;

        let session = self.login().await?;
        let mut cache = SecretCache::default();

        debug!("Fetching secrets from secret service");
        let shared =
            self.load_scope(session.as_ref(), &self.settings.common_scope, &mut cache).await?;

        let scoped = if self.settings.namespace.is_empty() {
            warn!("No namespace configured, only shared secrets are loaded");
            0
        } else {
            self.load_scope(session.as_ref(), &self.settings.namespace, &mut cache).await?
        };

        if self.settings.load_local_scope {
            for key in LOCAL_SCOPE_KEYS {
                let value = session.read(&self.settings.local_scope, key).await?;
                cache.insert(key.to_string(), value);
            }
            debug!(scope = %self.settings.local_scope, "Loaded local development secrets");
        }

        let total = cache.len();
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(cache));

        info!(
            namespace = %self.settings.namespace,
            shared_keys = shared,
            namespace_keys = scoped,
            total_keys = total,
            "Secret store ready"
        );
        Ok(())
    }

    fn snapshot(&self) -> Option<Arc<SecretCache>> {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Cache-only lookup. Never performs a network call.
    pub fn get(&self, key: &str) -> Result<SecretString> {
        let cache = self.snapshot().ok_or(SecretsError::NotOpen)?;
        match cache.get(key) {
            Some(value) => {
                debug!(key = %key, "Secret found");
                Ok(value.clone())
            }
            None => {
                warn!(key = %key, "Secret not found");
                Err(SecretsError::not_found(key))
            }
        }
    }

    /// Write `value` to the namespace scope.
    ///
    /// Logs in again for every call. The local cache is left
    /// untouched: callers observe the new value only after the next
    /// [`open`](Self::open).
    pub async fn update(&self, key: &str, value: &str) -> Result<()> {
        if self.settings.namespace.is_empty() {
            return Err(SecretsError::config_error("Cannot update a secret without a namespace"));
        }

        let session = self.login().await?;
        debug!(key = %key, "Updating secret");
        session.write(&self.settings.namespace, key, value).await?;
        info!(key = %key, namespace = %self.settings.namespace, "Updated secret");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Key names currently cached (empty before the first `open`).
    pub fn keys(&self) -> Vec<String> {
        self.snapshot().map(|cache| cache.keys()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.snapshot().map(|cache| cache.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::memory::{InMemoryConnector, InMemorySecretService};

    fn store_over(
        service: Arc<InMemorySecretService>,
        settings: SecretStoreSettings,
    ) -> SecretStore {
        SecretStore::new(Arc::new(InMemoryConnector::new(service)), settings)
    }

    #[tokio::test]
    async fn test_get_before_open_is_recoverable() {
        let store =
            store_over(Arc::new(InMemorySecretService::new()), SecretStoreSettings::new("svc"));
        let err = store.get("anything").unwrap_err();
        assert!(matches!(err, SecretsError::NotOpen));
        assert!(!store.is_open());
    }

    #[tokio::test]
    async fn test_failed_reopen_keeps_previous_cache() {
        let service = Arc::new(InMemorySecretService::new().with_secret("svc", "token", "v1"));
        let store = store_over(service.clone(), SecretStoreSettings::new("svc"));
        store.open().await.unwrap();

        service.set_sealed(true);
        assert!(matches!(store.open().await.unwrap_err(), SecretsError::Sealed));
        assert_eq!(store.get("token").unwrap().expose_secret(), "v1");
    }

    #[tokio::test]
    async fn test_empty_namespace_loads_shared_scope_only() {
        let service = Arc::new(
            InMemorySecretService::new()
                .with_secret("common", "shared", "1")
                .with_secret("", "stray", "2"),
        );
        let store = store_over(service, SecretStoreSettings::new(""));
        store.open().await.unwrap();
        assert_eq!(store.keys(), vec!["shared".to_string()]);
        assert!(store.update("shared", "x").await.is_err());
    }
}
