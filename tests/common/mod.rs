//! Common test utilities for all integration tests.
//!
//! Provides an in-memory secret service seeded with TLS material, runtime
//! construction helpers and an exit hook that counts instead of exiting.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use keystone::config::Config;
use keystone::runtime::{ServiceRuntime, ShutdownHook};
use keystone::scheduler::Scheduler;
use keystone::secrets::{InMemoryConnector, InMemorySecretService, SecretStore};
use tokio::net::TcpStream;
use tokio::time::sleep;

pub const NAMESPACE: &str = "weather";
pub const ACCESS_KEY: &str = "test-client-access-key";

/// Exit hook recording how often the fatal path asked to terminate.
#[derive(Default)]
pub struct CountingExit {
    calls: AtomicUsize,
    last_code: AtomicUsize,
}

impl CountingExit {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_code(&self) -> usize {
        self.last_code.load(Ordering::SeqCst)
    }
}

impl ShutdownHook for CountingExit {
    fn exit(&self, code: i32) {
        self.last_code.store(code as usize, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Self-signed localhost certificate and key as PEM.
pub fn self_signed_pair() -> (String, String) {
    let names = vec!["localhost".to_string(), "127.0.0.1".to_string()];
    let certified = rcgen::generate_simple_self_signed(names).expect("generate certificate");
    (certified.cert.pem(), certified.key_pair.serialize_pem())
}

/// Secret service holding everything a production service needs to start.
pub fn seeded_service() -> Arc<InMemorySecretService> {
    let (cert, key) = self_signed_pair();
    Arc::new(
        InMemorySecretService::new()
            .with_credentials("role-id", "secret-id")
            .with_secret("common", "ssl_cert", &cert)
            .with_secret("common", "ssl_key", &key)
            .with_secret("common", "ClientAccessKey", "shared-key-overridden")
            .with_secret("common", "DataBaseURL", "postgres://common")
            .with_secret(NAMESPACE, "ClientAccessKey", ACCESS_KEY)
            .with_secret(NAMESPACE, "WeatherApiKey", "w-123"),
    )
}

/// Production configuration bound to loopback on `port`.
pub fn test_config(port: u16) -> Config {
    let mut config = Config::default();
    config.service.name = "weather".to_string();
    config.service.namespace = NAMESPACE.to_string();
    config.secrets.role_id = "role-id".to_string();
    config.secrets.secret_id = "secret-id".into();
    config.api.bind_address = "127.0.0.1".to_string();
    config.api.port = port;
    config
}

pub fn store_over(service: Arc<InMemorySecretService>, config: &Config) -> Arc<SecretStore> {
    let settings = config.secrets.store_settings(&config.service.namespace, config.environment);
    Arc::new(SecretStore::new(Arc::new(InMemoryConnector::new(service)), settings))
}

/// Runtime over `service` whose fatal path only counts.
pub fn runtime_over(
    service: Arc<InMemorySecretService>,
    config: Config,
) -> (Arc<ServiceRuntime>, Arc<CountingExit>) {
    let exit = Arc::new(CountingExit::default());
    let secrets = store_over(service, &config);
    let scheduler = Arc::new(Scheduler::new(config.scheduler));
    let runtime =
        ServiceRuntime::from_parts(config, secrets, scheduler).with_shutdown_hook(exit.clone());
    (Arc::new(runtime), exit)
}

pub async fn wait_for_listener(addr: SocketAddr) {
    for _ in 0..20 {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                drop(stream);
                return;
            }
            Err(_) => sleep(Duration::from_millis(50)).await,
        }
    }
    panic!("server at {} did not become ready in time", addr);
}

/// HTTPS client trusting the self-signed test certificate.
pub fn https_client() -> reqwest::Client {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .expect("build https client")
}
