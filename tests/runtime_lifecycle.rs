//! Runtime bootstrap, the HTTPS surface and the fatal choke point.

mod common;

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use common::{
    https_client, runtime_over, seeded_service, self_signed_pair, test_config, wait_for_listener,
    ACCESS_KEY,
};
use keystone::runtime::ServiceState;
use keystone::secrets::InMemorySecretService;
use keystone::Error;
use serde_json::{json, Value};

fn forecast_routes() -> Router {
    Router::new().route("/forecast", get(|| async { Json(json!({"forecast": "sunny"})) }))
}

#[tokio::test]
async fn sealed_store_runs_fatal_path_exactly_once() {
    let service = seeded_service();
    service.set_sealed(true);
    let (runtime, exit) = runtime_over(service, test_config(0));

    let err = runtime.start().await.unwrap_err();
    assert!(matches!(err, Error::Secrets(_)));
    assert_eq!(exit.calls(), 1);
    assert_eq!(exit.last_code(), 1);
    assert_eq!(runtime.state(), ServiceState::Stopped);

    // Later fatal calls never exit twice.
    runtime.fatal(true).await;
    assert_eq!(exit.calls(), 1);
}

#[tokio::test]
async fn missing_access_key_is_fatal() {
    let (cert, key) = self_signed_pair();
    let service = Arc::new(
        InMemorySecretService::new()
            .with_secret("common", "ssl_cert", &cert)
            .with_secret("common", "ssl_key", &key),
    );
    let (runtime, exit) = runtime_over(service, test_config(0));

    let err = runtime.create_listener().await.unwrap_err();
    assert!(matches!(err, Error::Fatal(ref msg) if msg.contains("ClientAccessKey")));
    assert_eq!(exit.calls(), 1);
    assert!(runtime.access_key().await.is_none());
}

#[tokio::test]
async fn invalid_tls_material_is_fatal() {
    let service = seeded_service();
    service.insert("common", "ssl_cert", "not a certificate");
    let (runtime, exit) = runtime_over(service, test_config(0));

    let err = runtime.create_listener().await.unwrap_err();
    assert!(matches!(err, Error::Tls(_)));
    assert_eq!(exit.calls(), 1);
    assert_eq!(runtime.state(), ServiceState::Stopped);
}

#[tokio::test]
async fn serves_ping_gate_and_404_over_https() {
    let (runtime, exit) = runtime_over(seeded_service(), test_config(0));
    runtime.add_routes(forecast_routes());
    runtime.start().await.unwrap();

    let addr = runtime.local_addr().await.unwrap();
    wait_for_listener(addr).await;
    let base = format!("https://{}", addr);
    let client = https_client();

    let ping = client.get(format!("{base}/ping")).send().await.unwrap();
    assert_eq!(ping.status(), 200);
    assert_eq!(ping.json::<Value>().await.unwrap(), json!({"reply": "pong"}));

    let denied = client.get(format!("{base}/forecast")).send().await.unwrap();
    assert_eq!(denied.status(), 401);
    assert_eq!(
        denied.json::<Value>().await.unwrap(),
        json!({"error": "There was a problem authenticating you"})
    );

    let allowed = client
        .get(format!("{base}/forecast"))
        .header("client-access-key", ACCESS_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), 200);
    assert_eq!(allowed.json::<Value>().await.unwrap(), json!({"forecast": "sunny"}));

    let by_query =
        client.get(format!("{base}/forecast?clientaccesskey={ACCESS_KEY}")).send().await.unwrap();
    assert_eq!(by_query.status(), 200);

    let missing = client.get(format!("{base}/nowhere")).send().await.unwrap();
    assert_eq!(missing.status(), 404);
    assert!(missing.json::<Value>().await.unwrap()["error"].is_string());

    runtime.stop().await;
    assert_eq!(runtime.state(), ServiceState::Stopped);
    assert_eq!(exit.calls(), 0, "stop never exits the process");
}

#[tokio::test]
async fn listen_twice_is_a_noop() {
    let (runtime, _exit) = runtime_over(seeded_service(), test_config(0));
    runtime.start().await.unwrap();
    let first = runtime.local_addr().await;

    runtime.listen().await.unwrap();
    assert_eq!(runtime.local_addr().await, first);
    assert!(runtime.is_started());

    runtime.stop().await;
}

#[tokio::test]
async fn bind_failure_is_fatal() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();
    let (runtime, exit) = runtime_over(seeded_service(), test_config(port));

    let err = runtime.start().await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert_eq!(exit.calls(), 1);
    assert_eq!(runtime.state(), ServiceState::Stopped);
}

#[tokio::test]
async fn stopped_runtime_refuses_to_listen_again() {
    let (runtime, _exit) = runtime_over(seeded_service(), test_config(0));
    runtime.start().await.unwrap();
    runtime.stop().await;

    assert!(matches!(runtime.listen().await.unwrap_err(), Error::Fatal(_)));
    assert!(runtime.create_listener().await.is_err());
    assert!(runtime.local_addr().await.is_none());
}

#[tokio::test]
async fn listen_before_create_listener_is_an_error() {
    let (runtime, exit) = runtime_over(seeded_service(), test_config(0));
    assert!(matches!(runtime.listen().await.unwrap_err(), Error::Internal(_)));
    assert_eq!(exit.calls(), 0);
    assert_eq!(runtime.state(), ServiceState::Idle);
}

#[tokio::test]
async fn wait_for_shutdown_resolves_after_fatal() {
    let (runtime, exit) = runtime_over(seeded_service(), test_config(0));
    runtime.start().await.unwrap();

    let waiter = {
        let runtime = runtime.clone();
        tokio::spawn(async move { runtime.wait_for_shutdown().await })
    };

    runtime.fatal(true).await;
    tokio::time::timeout(std::time::Duration::from_secs(5), waiter).await.unwrap().unwrap();
    assert_eq!(exit.calls(), 1);
}

#[tokio::test]
async fn access_key_is_loaded_from_namespace_scope() {
    let (runtime, _exit) = runtime_over(seeded_service(), test_config(0));
    runtime.create_listener().await.unwrap();
    assert_eq!(runtime.access_key().await.unwrap().expose_secret(), ACCESS_KEY);
}

#[tokio::test]
async fn create_listener_after_start_does_not_reload() {
    let service = seeded_service();
    let (runtime, exit) = runtime_over(service.clone(), test_config(0));
    runtime.start().await.unwrap();
    let addr = runtime.local_addr().await;
    let calls = service.calls().network_calls();

    runtime.create_listener().await.unwrap();
    assert_eq!(service.calls().network_calls(), calls, "secret store is not reopened");
    assert_eq!(runtime.local_addr().await, addr);
    assert!(runtime.is_started());

    runtime.stop().await;
    assert_eq!(exit.calls(), 0);
}

#[tokio::test]
async fn silent_client_does_not_block_other_clients() {
    let (runtime, _exit) = runtime_over(seeded_service(), test_config(0));
    runtime.start().await.unwrap();
    let addr = runtime.local_addr().await.unwrap();
    wait_for_listener(addr).await;

    // Connects but never starts the TLS handshake.
    let _silent = tokio::net::TcpStream::connect(addr).await.unwrap();

    let ping = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        https_client().get(format!("https://{}/ping", addr)).send(),
    )
    .await
    .expect("ping answered while another client stalls")
    .unwrap();
    assert_eq!(ping.status(), 200);

    runtime.stop().await;
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn rate_limit_is_keyed_by_source_address() {
    let (runtime, _exit) = runtime_over(seeded_service(), test_config(0));
    runtime.start().await.unwrap();
    let addr = runtime.local_addr().await.unwrap();
    wait_for_listener(addr).await;
    let url = format!("https://{}/ping", addr);

    let first = https_client();
    for i in 0..10 {
        let response = first.get(&url).send().await.unwrap();
        assert_eq!(response.status(), 200, "request {} within the burst", i + 1);
    }
    let limited = first.get(&url).send().await.unwrap();
    assert_eq!(limited.status(), 429);
    assert!(limited.headers().contains_key("retry-after"));

    let second = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .local_address(std::net::IpAddr::from([127, 0, 0, 2]))
        .build()
        .unwrap();
    let response = second.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 200, "another address has its own bucket");

    runtime.stop().await;
}
