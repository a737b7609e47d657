//! In-memory secret service.
//!
//! A complete stand-in for the central secret service: scopes of key/value
//! pairs, a seal flag, an approle credential check and per-operation call
//! counters. Used for local development without Vault and by the test suite to
//! observe exactly which network operations the store performs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::client::{SealStatus, SecretService, SecretServiceConnector};
use super::error::{Result, SecretsError};
use super::types::SecretString;

/// Snapshot of how many times each contract operation was invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub connect: usize,
    pub status: usize,
    pub authenticate: usize,
    pub list: usize,
    pub read: usize,
    pub write: usize,
}

impl CallCounts {
    /// Total number of backend round trips (connects excluded).
    pub fn network_calls(&self) -> usize {
        self.status + self.authenticate + self.list + self.read + self.write
    }
}

#[derive(Default)]
struct Counters {
    connect: AtomicUsize,
    status: AtomicUsize,
    authenticate: AtomicUsize,
    list: AtomicUsize,
    read: AtomicUsize,
    write: AtomicUsize,
}

/// In-memory secret service shared by every connection handed out by
/// [`InMemoryConnector`].
pub struct InMemorySecretService {
    scopes: RwLock<HashMap<String, BTreeMap<String, String>>>,
    sealed: AtomicBool,
    credentials: Option<(String, String)>,
    issued_token: String,
    fail_connect: AtomicBool,
    counters: Counters,
}

impl Default for InMemorySecretService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySecretService {
    /// An unsealed service that accepts any approle credentials.
    pub fn new() -> Self {
        Self {
            scopes: RwLock::new(HashMap::new()),
            sealed: AtomicBool::new(false),
            credentials: None,
            issued_token: format!("mem.{}", uuid::Uuid::new_v4()),
            fail_connect: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Only accept this role id / secret id pair at login.
    pub fn with_credentials(
        mut self,
        role_id: impl Into<String>,
        secret_id: impl Into<String>,
    ) -> Self {
        self.credentials = Some((role_id.into(), secret_id.into()));
        self
    }

    /// Seed a secret.
    pub fn with_secret(self, scope: &str, key: &str, value: &str) -> Self {
        self.insert(scope, key, value);
        self
    }

    pub fn insert(&self, scope: &str, key: &str, value: &str) {
        let mut scopes = self.scopes.write().unwrap_or_else(|e| e.into_inner());
        scopes.entry(scope.to_string()).or_default().insert(key.to_string(), value.to_string());
    }

    /// Raw stored value, bypassing the call counters.
    pub fn peek(&self, scope: &str, key: &str) -> Option<String> {
        let scopes = self.scopes.read().unwrap_or_else(|e| e.into_inner());
        scopes.get(scope).and_then(|entries| entries.get(key)).cloned()
    }

    pub fn set_sealed(&self, sealed: bool) {
        self.sealed.store(sealed, Ordering::SeqCst);
    }

    /// Make every subsequent `connect` fail as if the service were unreachable.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.fail_connect.store(unreachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            connect: self.counters.connect.load(Ordering::SeqCst),
            status: self.counters.status.load(Ordering::SeqCst),
            authenticate: self.counters.authenticate.load(Ordering::SeqCst),
            list: self.counters.list.load(Ordering::SeqCst),
            read: self.counters.read.load(Ordering::SeqCst),
            write: self.counters.write.load(Ordering::SeqCst),
        }
    }

    fn ensure_unsealed(&self) -> Result<()> {
        if self.sealed.load(Ordering::SeqCst) {
            Err(SecretsError::Sealed)
        } else {
            Ok(())
        }
    }
}

/// One connection to the in-memory service; authenticated connections carry
/// the token returned by login.
struct InMemoryConnection {
    service: Arc<InMemorySecretService>,
    token: Option<String>,
}

impl InMemoryConnection {
    fn ensure_authenticated(&self) -> Result<()> {
        match &self.token {
            Some(token) if *token == self.service.issued_token => Ok(()),
            Some(_) => Err(SecretsError::authentication_failed("invalid session token")),
            None => Err(SecretsError::authentication_failed("missing session token")),
        }
    }
}

#[async_trait]
impl SecretService for InMemoryConnection {
    async fn status(&self) -> Result<SealStatus> {
        self.service.counters.status.fetch_add(1, Ordering::SeqCst);
        Ok(SealStatus { sealed: self.service.sealed.load(Ordering::SeqCst) })
    }

    async fn authenticate(&self, role_id: &str, secret_id: &SecretString) -> Result<SecretString> {
        self.service.counters.authenticate.fetch_add(1, Ordering::SeqCst);
        self.service.ensure_unsealed()?;

        if let Some((expected_role, expected_secret)) = &self.service.credentials {
            if expected_role != role_id || expected_secret != secret_id.expose_secret() {
                return Err(SecretsError::authentication_failed("invalid role id or secret id"));
            }
        }

        Ok(SecretString::new(self.service.issued_token.clone()))
    }

    async fn list(&self, scope: &str) -> Result<Vec<String>> {
        self.service.counters.list.fetch_add(1, Ordering::SeqCst);
        self.service.ensure_unsealed()?;
        self.ensure_authenticated()?;

        let scopes = self.service.scopes.read().unwrap_or_else(|e| e.into_inner());
        Ok(scopes.get(scope).map(|entries| entries.keys().cloned().collect()).unwrap_or_default())
    }

    async fn read(&self, scope: &str, key: &str) -> Result<SecretString> {
        self.service.counters.read.fetch_add(1, Ordering::SeqCst);
        self.service.ensure_unsealed()?;
        self.ensure_authenticated()?;

        self.service
            .peek(scope, key)
            .map(SecretString::new)
            .ok_or_else(|| SecretsError::not_found(format!("{}/{}", scope, key)))
    }

    async fn write(&self, scope: &str, key: &str, value: &str) -> Result<()> {
        self.service.counters.write.fetch_add(1, Ordering::SeqCst);
        self.service.ensure_unsealed()?;
        self.ensure_authenticated()?;

        self.service.insert(scope, key, value);
        Ok(())
    }
}

/// Connector handing out connections to a shared [`InMemorySecretService`].
#[derive(Clone)]
pub struct InMemoryConnector {
    service: Arc<InMemorySecretService>,
}

impl InMemoryConnector {
    pub fn new(service: Arc<InMemorySecretService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<InMemorySecretService> {
        &self.service
    }
}

impl SecretServiceConnector for InMemoryConnector {
    fn connect(&self, token: Option<&SecretString>) -> Result<Arc<dyn SecretService>> {
        self.service.counters.connect.fetch_add(1, Ordering::SeqCst);
        if self.service.fail_connect.load(Ordering::SeqCst) {
            return Err(SecretsError::connection_failed("in-memory secret service unreachable"));
        }

        Ok(Arc::new(InMemoryConnection {
            service: self.service.clone(),
            token: token.map(|t| t.expose_secret().to_string()),
        }))
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}
