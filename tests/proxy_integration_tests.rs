//! # Proxy Integration Tests
//!
//! Requests go through a real center to an echo upstream that reports what
//! it received: method, path with query, and headers.

use axum::http::{header, HeaderMap, HeaderName, Method, Uri};
use axum::Json;
use cb_center::{CenterApplication, RunningCenter};
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::time::Duration;
use wiremock::matchers::method as method_matcher;
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: String) -> impl axum::response::IntoResponse {
    let headers: Map<String, Value> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                Value::String(value.to_str().unwrap_or_default().to_string()),
            )
        })
        .collect();

    (
        [
            (header::SET_COOKIE, "upstream-session=1"),
            (HeaderName::from_static("x-upstream"), "echo"),
        ],
        Json(json!({
            "method": method.as_str(),
            "uri": uri.to_string(),
            "headers": headers,
            "body": body,
        })),
    )
}

async fn spawn_echo() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = axum::Router::new().fallback(echo);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn start(extra: &[String]) -> RunningCenter {
    let mut args: Vec<String> = [
        "--server.address=127.0.0.1",
        "--server.port=0",
        "--metrics.enabled=false",
        "--static_resources.enabled=false",
        "--logging.format=text",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.extend(extra.iter().cloned());

    CenterApplication::from_args(args).unwrap().start().await.unwrap()
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Default route: prefix stripped, query kept, forwarding headers added
#[tokio::test]
async fn test_default_route_rewrites_path_and_headers() {
    let upstream = spawn_echo().await;
    let running = start(&[format!("--discovery.registry.services.users=http://{}", upstream)]).await;
    let base = format!("http://{}", running.local_addr());

    let response = client()
        .get(format!("{}/users/7/profile?expand=true", base))
        .header("cookie", "session=secret")
        .header("authorization", "Bearer token")
        .header("x-custom", "kept")
        .header("x-forwarded-for", "203.0.113.9")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers().get("x-upstream").unwrap(), "echo");
    assert!(response.headers().get("set-cookie").is_none());
    assert!(response.headers().contains_key("x-request-id"));

    let echoed: Value = response.json().await.unwrap();
    assert_eq!(echoed["method"], "GET");
    assert_eq!(echoed["uri"], "/7/profile?expand=true");

    let headers = &echoed["headers"];
    assert_eq!(headers["x-custom"], "kept");
    assert!(headers.get("cookie").is_none());
    assert!(headers.get("authorization").is_none());
    assert_eq!(headers["x-forwarded-prefix"], "/users");
    assert_eq!(headers["x-forwarded-proto"], "http");
    assert_eq!(headers["x-forwarded-host"], running.local_addr().to_string());
    assert_eq!(headers["x-forwarded-port"], running.local_addr().port().to_string());
    assert_eq!(headers["x-forwarded-for"], "203.0.113.9, 127.0.0.1");
    // Host is the upstream's own, not the client's
    assert_eq!(headers["host"], upstream.to_string());
    assert!(headers.get("x-request-id").is_some());

    running.shutdown().await.unwrap();
}

/// With `add_proxy_headers` off the upstream sees only the client's headers
#[tokio::test]
async fn test_proxy_headers_disabled() {
    let upstream = spawn_echo().await;
    let running = start(&[
        "--proxy.add_proxy_headers=false".to_string(),
        format!("--discovery.registry.services.users=http://{}", upstream),
    ])
    .await;
    let base = format!("http://{}", running.local_addr());

    let response = client()
        .get(format!("{}/users/7", base))
        .header("x-custom", "kept")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().get("x-request-id").is_none());

    let echoed: Value = response.json().await.unwrap();
    let headers = echoed["headers"].as_object().unwrap();
    assert_eq!(headers["x-custom"], "kept");
    assert!(headers.keys().all(|name| !name.starts_with("x-forwarded-")));
    assert!(!headers.contains_key("x-request-id"));

    running.shutdown().await.unwrap();
}

/// Global prefix plus a configured route with its own sensitive headers
#[tokio::test]
async fn test_prefix_and_route_overrides() {
    let upstream = spawn_echo().await;
    let running = start(&[
        "--proxy.prefix=/api".to_string(),
        format!("--discovery.registry.services.accounts=http://{}", upstream),
        "--proxy.routes.billing.path=/billing/**".to_string(),
        "--proxy.routes.billing.service_id=accounts".to_string(),
        "--proxy.routes.billing.strip_prefix=false".to_string(),
        "--proxy.routes.billing.sensitive_headers=x-secret".to_string(),
    ])
    .await;
    let base = format!("http://{}", running.local_addr());

    let echoed: Value = client()
        .post(format!("{}/api/billing/invoices", base))
        .header("cookie", "passes=through")
        .header("x-secret", "hidden")
        .body("total=10")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["uri"], "/billing/invoices");
    assert_eq!(echoed["body"], "total=10");
    assert_eq!(echoed["headers"]["cookie"], "passes=through");
    assert!(echoed["headers"].get("x-secret").is_none());
    assert_eq!(echoed["headers"]["x-forwarded-prefix"], "/api");

    // Default routes live under the prefix too
    let echoed: Value = client()
        .get(format!("{}/api/accounts/1", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(echoed["uri"], "/1");
    assert_eq!(echoed["headers"]["x-forwarded-prefix"], "/api/accounts");

    // Without the prefix nothing matches
    let response = client().get(format!("{}/accounts/1", base)).send().await.unwrap();
    assert_eq!(response.status(), 404);

    running.shutdown().await.unwrap();
}

/// Ignored services get no default route; ignored patterns are never proxied
#[tokio::test]
async fn test_ignored_services_and_patterns() {
    let upstream = spawn_echo().await;
    let running = start(&[
        format!("--discovery.registry.services.admin-tools=http://{}", upstream),
        format!("--discovery.registry.services.orders=http://{}", upstream),
        "--proxy.ignored_services=admin-*".to_string(),
        "--proxy.ignored_patterns=/orders/internal/**".to_string(),
    ])
    .await;
    let base = format!("http://{}", running.local_addr());

    let routes: Value = client()
        .get(format!("{}/actuator/routes", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(routes.get("/admin-tools/**").is_none());
    assert_eq!(routes["/orders/**"], "orders");

    let response = client().get(format!("{}/orders/internal/x", base)).send().await.unwrap();
    assert_eq!(response.status(), 404);

    let response = client().get(format!("{}/orders/public", base)).send().await.unwrap();
    assert_eq!(response.status(), 200);

    running.shutdown().await.unwrap();
}

/// Round-robin alternates between two instances of one service
#[tokio::test]
async fn test_round_robin_over_instances() {
    let first = MockServer::start().await;
    Mock::given(method_matcher("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("first"))
        .expect(2)
        .mount(&first)
        .await;
    let second = MockServer::start().await;
    Mock::given(method_matcher("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("second"))
        .expect(2)
        .mount(&second)
        .await;

    let running = start(&[format!(
        "--discovery.registry.services.search={},{}",
        first.uri(),
        second.uri()
    )])
    .await;
    let base = format!("http://{}", running.local_addr());

    let mut bodies = Vec::new();
    for _ in 0..4 {
        let body = client()
            .get(format!("{}/search/q", base))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        bodies.push(body);
    }
    assert_ne!(bodies[0], bodies[1]);
    assert_eq!(bodies[0], bodies[2]);
    assert_eq!(bodies[1], bodies[3]);

    running.shutdown().await.unwrap();
}

/// Unreachable upstream is 502, a slow one is 504
#[tokio::test]
async fn test_upstream_failures_map_to_gateway_statuses() {
    let slow = MockServer::start().await;
    Mock::given(method_matcher("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&slow)
        .await;

    // Reserve a port, then free it so nothing is listening
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();

    let running = start(&[
        "--proxy.read_timeout=300ms".to_string(),
        "--proxy.routes.gone.path=/gone/**".to_string(),
        format!("--proxy.routes.gone.url=http://{}", closed),
        "--proxy.routes.slow.path=/slow/**".to_string(),
        format!("--proxy.routes.slow.url={}", slow.uri()),
    ])
    .await;
    let base = format!("http://{}", running.local_addr());

    let response = client().get(format!("{}/gone/x", base)).send().await.unwrap();
    assert_eq!(response.status(), 502);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "upstream_error");

    let response = client().get(format!("{}/slow/x", base)).send().await.unwrap();
    assert_eq!(response.status(), 504);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "timeout");

    running.shutdown().await.unwrap();
}

/// Bodies over `server.max_request_size` are rejected with 413
#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let upstream = spawn_echo().await;
    let running = start(&[
        "--server.max_request_size=16".to_string(),
        format!("--discovery.registry.services.upload=http://{}", upstream),
    ])
    .await;
    let base = format!("http://{}", running.local_addr());

    let response = client()
        .post(format!("{}/upload/file", base))
        .body("x".repeat(64))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 413);

    let response = client()
        .post(format!("{}/upload/file", base))
        .body("small")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    running.shutdown().await.unwrap();
}
