use super::Environment;

/// Secret names holding the HTTPS listener's key, certificate and the
/// client access key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSecretNames {
    pub key: &'static str,
    pub certificate: &'static str,
    pub access_key: &'static str,
}

impl TlsSecretNames {
    /// Development services read a dedicated dev pair; everything else the
    /// production pair.
    pub fn for_environment(environment: Environment) -> Self {
        let (key, certificate) = if environment.is_development() {
            ("dev_ssl_key", "dev_ssl_cert")
        } else {
            ("ssl_key", "ssl_cert")
        };
        Self { key, certificate, access_key: "ClientAccessKey" }
    }
}
