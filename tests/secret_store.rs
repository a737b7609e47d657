//! Secret store behaviour against the in-memory secret service.

mod common;

use std::sync::Arc;

use common::{seeded_service, store_over, test_config, ACCESS_KEY, NAMESPACE};
use keystone::config::Environment;
use keystone::secrets::{
    InMemoryConnector, InMemorySecretService, SecretStore, SecretStoreSettings, SecretsError,
};

#[tokio::test]
async fn namespace_entries_override_shared_entries() {
    let service = seeded_service();
    let store = store_over(service, &test_config(0));
    store.open().await.unwrap();

    assert_eq!(store.get("ClientAccessKey").unwrap().expose_secret(), ACCESS_KEY);
    assert_eq!(store.get("DataBaseURL").unwrap().expose_secret(), "postgres://common");
    assert_eq!(store.get("WeatherApiKey").unwrap().expose_secret(), "w-123");
    assert_eq!(store.len(), 5);
}

#[tokio::test]
async fn every_key_of_both_scopes_is_readable_after_open() {
    let service = seeded_service();
    let store = store_over(service.clone(), &test_config(0));
    store.open().await.unwrap();

    for key in ["ssl_cert", "ssl_key", "ClientAccessKey", "DataBaseURL", "WeatherApiKey"] {
        assert!(store.get(key).is_ok(), "{} should be cached", key);
    }
    assert_eq!(store.keys().len(), 5);
}

#[tokio::test]
async fn missing_key_is_not_found_without_network_calls() {
    let service = seeded_service();
    let store = store_over(service.clone(), &test_config(0));
    store.open().await.unwrap();

    let before = service.calls();
    let err = store.get("NoSuchKey").unwrap_err();
    assert!(matches!(err, SecretsError::NotFound { ref key } if key == "NoSuchKey"));
    assert!(err.is_recoverable());

    store.get("ClientAccessKey").unwrap();
    assert_eq!(service.calls(), before);
}

#[tokio::test]
async fn update_writes_namespace_scope_but_leaves_cache() {
    let service = seeded_service();
    let store = store_over(service.clone(), &test_config(0));
    store.open().await.unwrap();

    store.update("WeatherApiKey", "w-456").await.unwrap();

    assert_eq!(service.peek(NAMESPACE, "WeatherApiKey").as_deref(), Some("w-456"));
    assert_eq!(store.get("WeatherApiKey").unwrap().expose_secret(), "w-123");

    store.open().await.unwrap();
    assert_eq!(store.get("WeatherApiKey").unwrap().expose_secret(), "w-456");
}

#[tokio::test]
async fn update_logs_in_again() {
    let service = seeded_service();
    let store = store_over(service.clone(), &test_config(0));
    store.open().await.unwrap();
    let logins = service.calls().authenticate;

    store.update("NewKey", "v").await.unwrap();
    assert_eq!(service.calls().authenticate, logins + 1);
    assert_eq!(service.calls().write, 1);
}

#[tokio::test]
async fn sealed_service_fails_open() {
    let service = seeded_service();
    service.set_sealed(true);
    let store = store_over(service.clone(), &test_config(0));

    assert!(matches!(store.open().await.unwrap_err(), SecretsError::Sealed));
    assert_eq!(service.calls().authenticate, 0, "no login against a sealed service");
    assert!(!store.is_open());
}

#[tokio::test]
async fn unreachable_service_fails_open() {
    let service = seeded_service();
    service.set_unreachable(true);
    let store = store_over(service, &test_config(0));

    assert!(matches!(store.open().await.unwrap_err(), SecretsError::ConnectionFailed { .. }));
}

#[tokio::test]
async fn wrong_credentials_fail_open() {
    let service = seeded_service();
    let mut config = test_config(0);
    config.secrets.secret_id = "wrong".into();
    let store = store_over(service, &config);

    assert!(matches!(store.open().await.unwrap_err(), SecretsError::AuthenticationFailed { .. }));
}

#[tokio::test]
async fn development_mode_loads_local_scope() {
    let service = seeded_service();
    service.insert("localhost", "ssl_key", "local-key");
    service.insert("localhost", "ssl_cert", "local-cert");
    service.insert("localhost", "DataBaseURL", "postgres://localhost");

    let mut config = test_config(0);
    config.environment = Environment::Development;
    let store = store_over(service, &config);
    store.open().await.unwrap();

    assert_eq!(store.get("DataBaseURL").unwrap().expose_secret(), "postgres://localhost");
    assert_eq!(store.get("ssl_key").unwrap().expose_secret(), "local-key");
}

#[tokio::test]
async fn development_mode_requires_local_keys() {
    let service = seeded_service();
    let mut config = test_config(0);
    config.environment = Environment::Development;
    let store = store_over(service, &config);

    assert!(matches!(store.open().await.unwrap_err(), SecretsError::NotFound { .. }));
}

#[tokio::test]
async fn concurrent_opens_are_serialised_and_both_succeed() {
    let service = seeded_service();
    let store = store_over(service.clone(), &test_config(0));

    let (first, second) = tokio::join!(store.open(), store.open());
    first.unwrap();
    second.unwrap();
    assert_eq!(service.calls().authenticate, 2);
    assert_eq!(store.len(), 5);
}

#[tokio::test]
async fn custom_scopes_are_honoured() {
    let service = Arc::new(
        InMemorySecretService::new()
            .with_secret("alfred_common", "shared", "1")
            .with_secret("svc", "own", "2"),
    );
    let settings = SecretStoreSettings::new("svc").with_common_scope("alfred_common");
    let store = SecretStore::new(Arc::new(InMemoryConnector::new(service)), settings);
    store.open().await.unwrap();

    assert_eq!(store.keys(), vec!["own".to_string(), "shared".to_string()]);
}
