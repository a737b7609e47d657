//! HashiCorp Vault backend for the secret service contract.
//!
//! Talks to Vault's KV v2 engine through `vaultrs`. Every secret lives at
//! `{mount}/{scope}/{key}` as a map whose `data` field carries the value;
//! approle login is used for authentication and `sys/health` for seal status.
//!
//! No timeout wrapping is applied here: a hung Vault blocks the caller until
//! the underlying HTTP transport gives up.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;
use vaultrs::kv2;
use vaultrs::sys::ServerStatus;

use super::client::{SealStatus, SecretService, SecretServiceConnector};
use super::error::{Result, SecretsError};
use super::types::SecretString;

/// Field inside each stored secret map that holds the actual value.
pub const VALUE_FIELD: &str = "data";

/// Configuration for the Vault backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Vault server address (e.g., "https://vault.example.com:8200")
    pub address: String,

    /// Vault namespace (Enterprise multi-tenancy)
    pub namespace: Option<String>,

    /// KV v2 mount path (default: "secret")
    #[serde(default = "default_mount_path")]
    pub mount_path: String,

    /// Mount of the approle auth method (default: "approle")
    #[serde(default = "default_auth_mount")]
    pub auth_mount: String,
}

fn default_mount_path() -> String {
    "secret".to_string()
}

fn default_auth_mount() -> String {
    "approle".to_string()
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8200".to_string(),
            namespace: None,
            mount_path: default_mount_path(),
            auth_mount: default_auth_mount(),
        }
    }
}

/// Builds [`VaultSecretService`] clients, optionally carrying a session token.
#[derive(Debug, Clone)]
pub struct VaultConnector {
    config: VaultConfig,
}

impl VaultConnector {
    pub fn new(config: VaultConfig) -> Result<Self> {
        if config.address.trim().is_empty() {
            return Err(SecretsError::config_error("Vault address cannot be empty"));
        }
        if config.mount_path.trim().is_empty() {
            return Err(SecretsError::config_error("Vault mount path cannot be empty"));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }
}

impl SecretServiceConnector for VaultConnector {
    fn connect(&self, token: Option<&SecretString>) -> Result<Arc<dyn SecretService>> {
        let mut settings_builder = VaultClientSettingsBuilder::default();
        settings_builder.address(self.config.address.as_str());

        if let Some(token) = token {
            settings_builder.token(token.expose_secret());
        }

        if let Some(namespace) = self.config.namespace.clone() {
            settings_builder.namespace(Some(namespace));
        }

        let settings = settings_builder.build().map_err(|e| {
            SecretsError::config_error(format!("Invalid Vault configuration: {}", e))
        })?;

        let client = VaultClient::new(settings).map_err(|e| {
            SecretsError::connection_failed(format!("Failed to create Vault client: {}", e))
        })?;

        tracing::debug!(
            address = %self.config.address,
            authenticated = token.is_some(),
            "Created Vault client"
        );

        Ok(Arc::new(VaultSecretService {
            client,
            mount_path: self.config.mount_path.clone(),
            auth_mount: self.config.auth_mount.clone(),
        }))
    }

    fn backend_name(&self) -> &'static str {
        "vault"
    }
}

/// One Vault connection (authenticated or not).
pub struct VaultSecretService {
    client: VaultClient,
    mount_path: String,
    auth_mount: String,
}

fn is_missing(err: &ClientError) -> bool {
    matches!(err, ClientError::APIError { code: 404, .. })
}

#[async_trait]
impl SecretService for VaultSecretService {
    async fn status(&self) -> Result<SealStatus> {
        let status = vaultrs::sys::status(&self.client).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to query Vault status");
            SecretsError::connection_failed(format!("Vault status check failed: {}", e))
        })?;

        let sealed = matches!(status, ServerStatus::SEALED);
        Ok(SealStatus { sealed })
    }

    async fn authenticate(&self, role_id: &str, secret_id: &SecretString) -> Result<SecretString> {
        let auth = vaultrs::auth::approle::login(
            &self.client,
            &self.auth_mount,
            role_id,
            secret_id.expose_secret(),
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, auth_mount = %self.auth_mount, "Approle login failed");
            SecretsError::authentication_failed(format!("Approle login failed: {}", e))
        })?;

        Ok(SecretString::new(auth.client_token))
    }

    async fn list(&self, scope: &str) -> Result<Vec<String>> {
        let keys = match kv2::list(&self.client, &self.mount_path, scope).await {
            Ok(keys) => keys,
            Err(e) if is_missing(&e) => {
                tracing::warn!(scope = %scope, "Secret scope is empty or missing");
                Vec::new()
            }
            Err(e) => {
                tracing::error!(error = %e, scope = %scope, "Failed to list secrets from Vault");
                return Err(SecretsError::backend_error(format!(
                    "Failed to list scope '{}': {}",
                    scope, e
                )));
            }
        };

        // Nested folders are listed with a trailing slash; only leaf keys are secrets.
        Ok(keys.into_iter().filter(|key| !key.ends_with('/')).collect())
    }

    async fn read(&self, scope: &str, key: &str) -> Result<SecretString> {
        let path = format!("{}/{}", scope, key);
        let secret: HashMap<String, serde_json::Value> =
            kv2::read(&self.client, &self.mount_path, &path).await.map_err(|e| {
                if is_missing(&e) {
                    SecretsError::not_found(path.clone())
                } else {
                    tracing::error!(error = %e, path = %path, "Failed to read secret from Vault");
                    SecretsError::backend_error(format!("Failed to read '{}': {}", path, e))
                }
            })?;

        secret.get(VALUE_FIELD).map(SecretString::from_json).ok_or_else(|| {
            SecretsError::invalid_value(format!("Secret '{}' has no '{}' field", path, VALUE_FIELD))
        })
    }

    async fn write(&self, scope: &str, key: &str, value: &str) -> Result<()> {
        let path = format!("{}/{}", scope, key);
        let mut data = HashMap::new();
        data.insert(VALUE_FIELD, value);

        kv2::set(&self.client, &self.mount_path, &path, &data).await.map_err(|e| {
            tracing::error!(error = %e, path = %path, "Failed to write secret to Vault");
            SecretsError::backend_error(format!("Failed to store '{}': {}", path, e))
        })?;

        Ok(())
    }
}
