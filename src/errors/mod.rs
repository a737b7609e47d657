//! # Error Handling
//!
//! Crate-wide error type. Library layers (secrets, scheduler, api) return their
//! own error values; only the runtime bootstrap turns an [`Error`] into process
//! termination.

pub mod tls;

pub use tls::TlsError;

use crate::secrets::SecretsError;

/// Custom result type for keystone operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the service runtime
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network transport errors (bind, accept, serve)
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Secret store errors
    #[error(transparent)]
    Secrets(#[from] SecretsError),

    /// TLS material could not be turned into a listener configuration
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// An unrecoverable condition that was routed through the shutdown choke point
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new fatal error
    pub fn fatal<S: Into<String>>(message: S) -> Self {
        Self::Fatal(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this error already went through the fatal shutdown path.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}
