//! Full-stack tests: server, registry, and the multiplexing client.

use std::sync::Arc;
use std::time::Duration;

use parallax_client::RpcClient;
use parallax_common::config::RpcConfig;
use parallax_common::ratelimit::RateLimitConfig;
use parallax_proto::{
    RpcRequest, Value, EXT_ERROR_CODE, EXT_RETRY_AFTER_MS, STATUS_RATE_LIMITED,
    STATUS_UNAUTHENTICATED,
};
use parallax_registry::{CoordinationStore, MemoryStore, ServiceRegistry};
use parallax_server::{HandlerError, RpcServer, RpcService};

const SECRET: &str = "integration-test-secret";

fn greeting_service() -> RpcService {
    RpcService::new("GreetingService")
        .group("default")
        .version("1.0")
        .method("getGreeting", |request: RpcRequest| async move {
            let name = request
                .params
                .first()
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_else(|| "world".to_owned());
            Ok(Value::from(format!("hello, {name}")))
        })
        .method("setGreeting", |_request| async move {
            Ok(Value::Bool(true))
        })
        .method("explode", |_request| async move {
            Err(HandlerError::new("kaboom"))
        })
}

fn server_config(secure: bool) -> RpcConfig {
    let mut config = RpcConfig::default();
    config.server.bind_address = "127.0.0.1:0".to_owned();
    config.security.enabled = secure;
    config.security.secret = SECRET.to_owned();
    config
}

fn client_config() -> RpcConfig {
    let mut config = RpcConfig::default();
    config.client.balancer = "round_robin".to_owned();
    config.pool.warmup_connections = 0;
    config.pool.health_check_enabled = false;
    config
}

async fn start_stack(secure: bool) -> (Arc<RpcServer>, RpcClient, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(ServiceRegistry::new(store.clone()));

    let server = RpcServer::new(server_config(secure)).with_registry(registry);
    server.register_service(greeting_service());
    let server = Arc::new(server);
    server.start().await.unwrap();

    let client = RpcClient::new(client_config(), store.clone()).unwrap();
    (server, client, store)
}

fn greeting_request(method: &str, params: Vec<Value>) -> RpcRequest {
    RpcRequest::new("GreetingService", method, params)
        .with_group("default")
        .with_version("1.0")
}

#[tokio::test]
async fn discover_and_call_through_the_registry() {
    let (server, client, _store) = start_stack(false).await;

    let response = client
        .call(greeting_request("getGreeting", vec![Value::from("ada")]))
        .await
        .unwrap();
    assert!(response.is_success());
    assert_eq!(response.payload, Some(Value::from("hello, ada")));

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn business_error_surfaces_verbatim() {
    let (server, client, _store) = start_stack(false).await;

    let response = client
        .call(greeting_request("explode", vec![]))
        .await
        .unwrap();
    assert!(!response.is_success());
    assert_eq!(response.message, "kaboom");
    assert_eq!(
        response.extensions.get(EXT_ERROR_CODE).map(String::as_str),
        Some("BUSINESS_ERROR")
    );

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn authentication_gates_protected_services() {
    let (server, client, _store) = start_stack(true).await;

    // No token: rejected.
    let response = client
        .call(greeting_request("getGreeting", vec![]))
        .await
        .unwrap();
    assert_eq!(response.code, STATUS_UNAUTHENTICATED);
    assert_eq!(
        response.extensions.get(EXT_ERROR_CODE).map(String::as_str),
        Some("MISSING_TOKEN")
    );

    // Admin token: admitted everywhere.
    let token = server.auth().generate_token("ada", &["admin"]).unwrap();
    let response = client
        .call(greeting_request("getGreeting", vec![Value::from("ada")]).with_token(token.clone()))
        .await
        .unwrap();
    assert!(response.is_success());

    // Read-only token: read methods pass, writes are rejected.
    let read_token = server.auth().generate_token("bob", &["read"]).unwrap();
    let response = client
        .call(greeting_request("getGreeting", vec![]).with_token(read_token.clone()))
        .await
        .unwrap();
    assert!(response.is_success());

    let response = client
        .call(greeting_request("setGreeting", vec![]).with_token(read_token))
        .await
        .unwrap();
    assert_eq!(response.code, STATUS_UNAUTHENTICATED);
    assert_eq!(
        response.extensions.get(EXT_ERROR_CODE).map(String::as_str),
        Some("INSUFFICIENT_PERMISSIONS")
    );

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn api_keys_authenticate_services() {
    let (server, client, _store) = start_stack(true).await;

    let key = server
        .auth()
        .generate_api_key("GreetingService", &["service"]);
    let response = client
        .call(greeting_request("setGreeting", vec![]).with_token(key))
        .await
        .unwrap();
    assert!(response.is_success());

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn rate_limit_answers_429_with_retry_hint() {
    let (server, client, _store) = start_stack(false).await;

    // Tighten the per-service limiter so the burst trips it before any
    // refill lands (1 token per second, burst of 2).
    server.rate_limits().configure(
        "service:GreetingService#default#1.0",
        RateLimitConfig::per_second(1, 2),
    );

    let mut limited = None;
    for _ in 0..5 {
        let response = client
            .call(greeting_request("getGreeting", vec![]))
            .await
            .unwrap();
        if response.code == STATUS_RATE_LIMITED {
            limited = Some(response);
            break;
        }
    }

    let limited = limited.expect("burst should trip the service limiter");
    assert_eq!(
        limited.extensions.get(EXT_ERROR_CODE).map(String::as_str),
        Some("RATE_LIMITED")
    );
    assert!(limited.extensions.contains_key(EXT_RETRY_AFTER_MS));

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn shutdown_releases_registrations() {
    let (server, client, store) = start_stack(false).await;

    // Warm the discovery cache while the server is registered.
    assert!(client
        .call(greeting_request("getGreeting", vec![]))
        .await
        .unwrap()
        .is_success());

    server.shutdown().await;

    // Ephemeral nodes vanish with the registry session.
    let mut emptied = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if store
            .children_data("/rpc-services/GreetingService#default#1.0")
            .await
            .map(|children| children.is_empty())
            .unwrap_or(true)
        {
            emptied = true;
            break;
        }
    }
    assert!(emptied, "registrations were not released on shutdown");

    client.close().await;
}

#[tokio::test]
async fn server_metrics_record_dispatches() {
    let (server, client, _store) = start_stack(false).await;

    for _ in 0..3 {
        client
            .call(greeting_request("getGreeting", vec![]))
            .await
            .unwrap();
    }
    client.call(greeting_request("explode", vec![])).await.unwrap();

    let snapshot = server.metrics().snapshot("GreetingService#default#1.0");
    assert_eq!(snapshot.total, 4);
    assert_eq!(snapshot.success, 3);
    assert_eq!(snapshot.failed, 1);

    client.close().await;
    server.shutdown().await;
}
