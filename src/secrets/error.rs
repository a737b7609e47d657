//! Error types for secret store operations.

use thiserror::Error;

/// Result type for secrets operations.
pub type Result<T> = std::result::Result<T, SecretsError>;

/// Errors that can occur while talking to the secret service or reading the cache.
#[derive(Error, Debug)]
pub enum SecretsError {
    /// Key absent from the in-memory cache (or from the backend on `read`).
    #[error("Secret not found: {key}")]
    NotFound { key: String },

    /// The secret service reported itself sealed. Terminal, never retried.
    #[error("Secret service is sealed")]
    Sealed,

    /// Failed to connect to the secret service.
    #[error("Backend connection failed: {message}")]
    ConnectionFailed { message: String },

    /// The approle login exchange was rejected.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Secret value could not be interpreted.
    #[error("Invalid secret value: {reason}")]
    InvalidValue { reason: String },

    /// Backend-specific error.
    #[error("Backend error: {message}")]
    BackendError { message: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// `get` was called before any successful `open`.
    #[error("Secret store has not been opened")]
    NotOpen,

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl SecretsError {
    /// Create a not found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: message.into() }
    }

    /// Create an authentication failed error.
    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed { message: message.into() }
    }

    /// Create an invalid value error.
    pub fn invalid_value(reason: impl Into<String>) -> Self {
        Self::InvalidValue { reason: reason.into() }
    }

    /// Create a backend error.
    pub fn backend_error(message: impl Into<String>) -> Self {
        Self::BackendError { message: message.into() }
    }

    /// Create a config error.
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError { message: message.into() }
    }

    /// Recoverable errors are returned to the caller; everything else during
    /// `open` ends the process.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::NotOpen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = SecretsError::not_found("test_key");
        assert!(matches!(err, SecretsError::NotFound { .. }));
        assert_eq!(err.to_string(), "Secret not found: test_key");

        let err = SecretsError::connection_failed("timeout");
        assert!(matches!(err, SecretsError::ConnectionFailed { .. }));

        let err = SecretsError::authentication_failed("bad secret id");
        assert!(err.to_string().contains("bad secret id"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(SecretsError::not_found("k").is_recoverable());
        assert!(SecretsError::NotOpen.is_recoverable());
        assert!(!SecretsError::Sealed.is_recoverable());
        assert!(!SecretsError::connection_failed("refused").is_recoverable());
    }
}
