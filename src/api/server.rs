//! HTTPS listener built from PEM material held in the secret store.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use axum::extract::connect_info::Connected;
use axum::serve::{IncomingStream, Listener};
use axum::Router;
use rustls::pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_rustls::{server::TlsStream, TlsAcceptor};
use tracing::{error, info, warn};

use crate::errors::{Error, Result, TlsError};
use crate::secrets::SecretString;

/// Build a TLS acceptor from a PEM certificate chain and private key.
///
/// `cert_name`/`key_name` are the secret names, used only in error messages.
pub fn tls_acceptor_from_pem(
    certificate: &SecretString,
    cert_name: &str,
    private_key: &SecretString,
    key_name: &str,
) -> std::result::Result<TlsAcceptor, TlsError> {
    let cert_chain: Vec<CertificateDer<'static>> =
        CertificateDer::pem_slice_iter(certificate.expose_secret().as_bytes())
            .map(|result| {
                result.map_err(|err| TlsError::InvalidCertificatePem {
                    secret: cert_name.to_string(),
                    source: anyhow!(err),
                })
            })
            .collect::<std::result::Result<_, _>>()?;

    if cert_chain.is_empty() {
        return Err(TlsError::EmptyCertificateChain { secret: cert_name.to_string() });
    }

    let key = PrivateKeyDer::from_pem_slice(private_key.expose_secret().as_bytes()).map_err(|err| {
        TlsError::InvalidPrivateKey { secret: key_name.to_string(), source: Some(anyhow!(err)) }
    })?;

    let provider = rustls::crypto::ring::default_provider();
    let server_config = rustls::ServerConfig::builder_with_provider(provider.into())
        .with_safe_default_protocol_versions()
        .map_err(|err| TlsError::ServerConfig { source: anyhow!(err) })?
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|err| TlsError::ServerConfig { source: anyhow!(err) })?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Bind the TCP socket for `address` ("host:port").
pub async fn bind(address: &str) -> Result<TcpListener> {
    let addr: SocketAddr = address
        .parse()
        .map_err(|e| Error::config(format!("Invalid listen address '{}': {}", address, e)))?;
    TcpListener::bind(addr)
        .await
        .map_err(|e| Error::transport(format!("Failed to bind {}: {}", addr, e)))
}

/// Upper bound on a client's TLS handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Completed handshakes waiting for axum to pick them up.
const ACCEPT_BACKLOG: usize = 128;

/// Remote address of an HTTPS client, available to middleware as
/// `ConnectInfo<ClientAddr>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);

impl Connected<IncomingStream<'_, TlsListener>> for ClientAddr {
    fn connect_info(stream: IncomingStream<'_, TlsListener>) -> Self {
        ClientAddr(*stream.remote_addr())
    }
}

/// Serve `router` over TLS until `shutdown` resolves.
pub async fn serve_tls<F>(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    router: Router,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let tls_listener = TlsListener::new(listener, acceptor)?;
    let address = tls_listener.local_addr()?;
    info!(address = %address, "Starting HTTPS listener");

    axum::serve(tls_listener, router.into_make_service_with_connect_info::<ClientAddr>())
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::transport(format!("HTTPS listener error: {}", e)))?;

    info!(address = %address, "HTTPS listener closed");
    Ok(())
}

/// TCP listener that hands axum only streams whose TLS handshake completed.
///
/// Each handshake runs on its own task under a timeout, so a peer that
/// connects and never speaks cannot hold up other clients. Failed and timed
/// out handshakes are logged and dropped.
pub struct TlsListener {
    local_addr: SocketAddr,
    accepted: mpsc::Receiver<(TlsStream<TcpStream>, SocketAddr)>,
    accept_task: JoinHandle<()>,
}

impl TlsListener {
    pub fn new(listener: TcpListener, acceptor: TlsAcceptor) -> std::io::Result<Self> {
        Self::with_handshake_timeout(listener, acceptor, HANDSHAKE_TIMEOUT)
    }

    pub fn with_handshake_timeout(
        listener: TcpListener,
        acceptor: TlsAcceptor,
        handshake_timeout: Duration,
    ) -> std::io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let (sender, accepted) = mpsc::channel(ACCEPT_BACKLOG);
        let accept_task =
            tokio::spawn(accept_connections(listener, acceptor, handshake_timeout, sender));
        Ok(Self { local_addr, accepted, accept_task })
    }
}

impl Drop for TlsListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.accepted.recv().await {
            Some(connection) => connection,
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

async fn accept_connections(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
    accepted: mpsc::Sender<(TlsStream<TcpStream>, SocketAddr)>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(connection) => connection,
            Err(err) => {
                if !is_connection_error(&err) {
                    error!("HTTPS accept error: {err}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                continue;
            }
        };
        if accepted.is_closed() {
            return;
        }

        let acceptor = acceptor.clone();
        let accepted = accepted.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
                Ok(Ok(tls_stream)) => {
                    let _ = accepted.send((tls_stream, addr)).await;
                }
                Ok(Err(err)) => warn!(error = %err, %addr, "TLS handshake failed"),
                Err(_) => warn!(
                    %addr,
                    timeout_ms = handshake_timeout.as_millis() as u64,
                    "TLS handshake timed out"
                ),
            }
        });
    }
}

fn is_connection_error(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed() -> (SecretString, SecretString) {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        (SecretString::new(cert.cert.pem()), SecretString::new(cert.key_pair.serialize_pem()))
    }

    #[test]
    fn test_acceptor_from_valid_pem() {
        let (cert, key) = self_signed();
        assert!(tls_acceptor_from_pem(&cert, "ssl_cert", &key, "ssl_key").is_ok());
    }

    #[test]
    fn test_empty_certificate_is_rejected() {
        let (_, key) = self_signed();
        let not_pem = SecretString::new("not a pem");
        let err = tls_acceptor_from_pem(&not_pem, "ssl_cert", &key, "ssl_key").err().unwrap();
        assert!(matches!(
            err,
            TlsError::EmptyCertificateChain { ref secret } if secret == "ssl_cert"
        ));
    }

    #[test]
    fn test_garbage_key_is_rejected() {
        let (cert, _) = self_signed();
        let err = tls_acceptor_from_pem(&cert, "ssl_cert", &SecretString::new("junk"), "ssl_key")
            .err()
            .unwrap();
        assert!(matches!(err, TlsError::InvalidPrivateKey { .. }));
    }

    #[tokio::test]
    async fn test_idle_handshake_is_dropped_after_timeout() {
        use tokio::io::AsyncReadExt;

        let (cert, key) = self_signed();
        let acceptor = tls_acceptor_from_pem(&cert, "ssl_cert", &key, "ssl_key").unwrap();
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener =
            TlsListener::with_handshake_timeout(tcp, acceptor, Duration::from_millis(100)).unwrap();
        let addr = listener.local_addr().unwrap();

        let mut idle = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(5), idle.read(&mut buf))
            .await
            .expect("server should close a silent connection");
        assert!(matches!(read, Ok(0) | Err(_)), "unexpected read result {:?}", read);
        drop(listener);
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        assert!(matches!(bind("not-an-address").await.unwrap_err(), Error::Config(_)));
    }
}
