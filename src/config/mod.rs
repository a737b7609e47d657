//! # Configuration Management
//!
//! Environment-driven configuration for a service built on the runtime.
//! [`Config::from_env`] reads process variables (after `main` has loaded an
//! optional `.env` file); [`Config::from_lookup`] takes any lookup function so
//! tests never have to mutate the process environment.

pub mod tls;

pub use tls::TlsSecretNames;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::scheduler::PastDuePolicy;
use crate::secrets::{SecretStoreSettings, SecretString, VaultConfig};
use crate::{Error, Result};

/// Default listening port when `PORT` is unset.
pub const DEFAULT_PORT: u16 = 3978;

/// Deployment environment. Only `development` is special; anything else is
/// treated as production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl Environment {
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("development") {
            Environment::Development
        } else {
            Environment::Production
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

fn validate_namespace(namespace: &str) -> std::result::Result<(), ValidationError> {
    let valid = namespace.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        let mut err = ValidationError::new("namespace_charset");
        err.message = Some("Namespace may only contain letters, digits, '_' and '-'".into());
        Err(err)
    }
}

/// Identity of the service running on the runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServiceOptions {
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub name: String,

    /// Scopes the service's secrets and its Content-Security-Policy.
    #[validate(custom(function = "validate_namespace"))]
    pub namespace: String,

    #[validate(length(min = 1, message = "Service version cannot be empty"))]
    pub version: String,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            name: crate::APP_NAME.to_string(),
            namespace: String::new(),
            version: "1.0".to_string(),
        }
    }
}

/// Secret service location and approle credentials.
#[derive(Debug, Clone)]
pub struct SecretsConfig {
    pub vault: VaultConfig,
    pub role_id: String,
    pub secret_id: SecretString,
    pub common_scope: String,
    pub local_scope: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            vault: VaultConfig::default(),
            role_id: String::new(),
            secret_id: SecretString::default(),
            common_scope: "common".to_string(),
            local_scope: "localhost".to_string(),
        }
    }
}

impl SecretsConfig {
    /// Store settings for `namespace`; the local scope is loaded only in development.
    pub fn store_settings(&self, namespace: &str, environment: Environment) -> SecretStoreSettings {
        SecretStoreSettings::new(namespace)
            .with_credentials(self.role_id.clone(), self.secret_id.clone())
            .with_common_scope(self.common_scope.clone())
            .with_local_scope(self.local_scope.clone(), environment.is_development())
    }
}

/// Token bucket parameters for the per-address request limiter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate)]
pub struct RateLimitConfig {
    #[validate(range(min = 1, message = "Burst must allow at least one request"))]
    pub burst: u32,

    #[validate(range(min = 1, message = "Refill rate must be at least one token per second"))]
    pub per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { burst: 10, per_second: 5 }
    }
}

/// HTTPS listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ApiServerConfig {
    #[validate(length(min = 1, message = "Bind address cannot be empty"))]
    pub bind_address: String,

    /// Port 0 binds an ephemeral port.
    pub port: u16,

    /// When false, `/ping` is served without the access-key check.
    pub ping_requires_access_key: bool,

    /// Lower-case file extensions (without dot) served without an access key.
    pub static_asset_extensions: Vec<String>,

    #[validate(nested)]
    pub rate_limit: RateLimitConfig,

    #[validate(range(min = 1024, message = "Max body size must be at least 1KB"))]
    pub max_body_bytes: usize,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            ping_requires_access_key: false,
            static_asset_extensions: vec!["ts".to_string()],
            rate_limit: RateLimitConfig::default(),
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl ApiServerConfig {
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Daily scheduler configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate)]
pub struct SchedulerConfig {
    pub past_due: PastDuePolicy,

    #[validate(range(max = 23, message = "Reset hour must be between 0 and 23"))]
    pub reset_hour: u32,

    #[validate(range(max = 59, message = "Reset minute must be between 0 and 59"))]
    pub reset_minute: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { past_due: PastDuePolicy::Skip, reset_hour: 3, reset_minute: 0 }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub environment: Environment,
    /// Level used outside development (`TRACE_LEVEL`).
    pub level: String,
    pub service_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Production,
            level: "debug".to_string(),
            service_name: crate::APP_NAME.to_string(),
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, Validate)]
pub struct Config {
    pub environment: Environment,

    #[validate(nested)]
    pub service: ServiceOptions,

    pub secrets: SecretsConfig,

    #[validate(nested)]
    pub api: ApiServerConfig,

    #[validate(nested)]
    pub scheduler: SchedulerConfig,

    pub logging: LoggingConfig,
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl Config {
    /// Create configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let var_or = |name: &str, default: &str| var(name).unwrap_or_else(|| default.to_string());

        let environment = var("ENVIRONMENT").map(|v| Environment::parse(&v)).unwrap_or_default();

        let service = ServiceOptions {
            name: var_or("SERVICE_NAME", crate::APP_NAME),
            namespace: var_or("SERVICE_NAMESPACE", ""),
            version: var_or("SERVICE_VERSION", "1.0"),
        };

        let secrets = SecretsConfig {
            vault: VaultConfig {
                address: var_or("VAULT_URL", "http://127.0.0.1:8200"),
                namespace: var("VAULT_NAMESPACE"),
                mount_path: var_or("VAULT_MOUNT_PATH", "secret"),
                auth_mount: var_or("VAULT_AUTH_MOUNT", "approle"),
            },
            role_id: var_or("APP_ROLE_ID", ""),
            secret_id: SecretString::new(var_or("APP_TOKEN", "")),
            common_scope: var_or("VAULT_COMMON_SCOPE", "common"),
            local_scope: var_or("VAULT_LOCAL_SCOPE", "localhost"),
        };

        let port = match var("PORT") {
            Some(port) => {
                port.parse().map_err(|e| Error::config(format!("Invalid PORT '{}': {}", port, e)))?
            }
            None => DEFAULT_PORT,
        };

        let static_asset_extensions = var("STATIC_ASSET_EXTENSIONS")
            .map(|list| {
                list.split(',')
                    .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
                    .filter(|ext| !ext.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| vec!["ts".to_string()]);

        let api = ApiServerConfig {
            bind_address: var_or("BIND_ADDRESS", "0.0.0.0"),
            port,
            ping_requires_access_key: var("PING_REQUIRES_ACCESS_KEY")
                .map(|v| parse_bool(&v))
                .unwrap_or(false),
            static_asset_extensions,
            ..ApiServerConfig::default()
        };

        let past_due = match var("SCHEDULE_PAST_DUE") {
            Some(value) => value.parse::<PastDuePolicy>().map_err(Error::config)?,
            None => PastDuePolicy::Skip,
        };
        let scheduler = SchedulerConfig { past_due, ..SchedulerConfig::default() };

        let logging = LoggingConfig {
            environment,
            level: var_or("TRACE_LEVEL", "debug"),
            service_name: service.name.clone(),
        };

        let config = Self { environment, service, secrets, api, scheduler, logging };
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(|e| Error::config(e.to_string()))
    }

    /// Secret names holding the listener's TLS pair for this environment.
    pub fn tls_secret_names(&self) -> TlsSecretNames {
        TlsSecretNames::for_environment(self.environment)
    }
}
