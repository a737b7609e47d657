use thiserror::Error;

/// TLS-specific error variants surfaced while turning secret-store PEM material
/// into a listener configuration.
#[derive(Debug, Error)]
pub enum TlsError {
    /// No certificates were found in the supplied PEM text.
    #[error("Certificate secret '{secret}' does not contain any certificates")]
    EmptyCertificateChain { secret: String },

    /// The certificate PEM contents were invalid or unreadable.
    #[error("Certificate secret '{secret}' is not a valid PEM: {source}")]
    InvalidCertificatePem {
        secret: String,
        #[source]
        source: anyhow::Error,
    },

    /// The private key PEM contents were invalid or unsupported.
    #[error("Private key secret '{secret}' does not contain a supported private key")]
    InvalidPrivateKey {
        secret: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// rustls rejected the certificate/key combination.
    #[error("Failed to build TLS server configuration: {source}")]
    ServerConfig {
        #[source]
        source: anyhow::Error,
    },
}
