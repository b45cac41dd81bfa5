//! # Entrypoint Integration Tests
//!
//! The entrypoint is single-shot per process, so this binary holds exactly
//! one test that walks the whole scenario: start with both capabilities,
//! proxy a request to a discovered service, reject a second start, stop.

use cb_center::bootstrap;
use cb_center::{CenterError, LifecycleState};
use serde_json::Value;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Start, serve, refuse a second start, shut down
#[tokio::test]
async fn test_entrypoint_end_to_end() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/42"))
        .and(header("x-forwarded-prefix", "/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_string("order 42"))
        .expect(1)
        .mount(&upstream)
        .await;

    let args = vec![
        "--server.address=127.0.0.1".to_string(),
        "--server.port=0".to_string(),
        "--metrics.enabled=false".to_string(),
        "--static-resources.enabled=false".to_string(),
        "--logging.format=text".to_string(),
        format!("--discovery.registry.services.orders={}", upstream.uri()),
    ];

    let running = bootstrap::start(args.clone()).await.unwrap();
    assert_eq!(running.state(), LifecycleState::Started);
    assert!(running.capabilities().discovery_client_enabled);
    assert!(running.capabilities().reverse_proxy_enabled);
    assert!(running.is_registered());

    let base = format!("http://{}", running.local_addr());
    let client = client();

    let response = client.get(format!("{}/orders/42", base)).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.text().await.unwrap(), "order 42");

    let routes: Value = client
        .get(format!("{}/actuator/routes", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(routes["/orders/**"], "orders");
    // The center never routes to itself
    assert!(routes.get("/cb-center/**").is_none());

    let second = bootstrap::start(args).await;
    assert!(matches!(second, Err(CenterError::AlreadyStarted)));

    // The first instance is unaffected by the rejected start
    let health = client.get(format!("{}/actuator/health", base)).send().await.unwrap();
    assert_eq!(health.status(), 200);

    running.shutdown().await.unwrap();
    assert!(client.get(format!("{}/actuator/health", base)).send().await.is_err());
}
