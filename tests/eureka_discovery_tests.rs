//! # Eureka Discovery Integration Tests
//!
//! Wire-level behaviour of the Eureka client against a wiremock registry,
//! plus a center that discovers its upstream through that registry.

use cb_center::discovery::{DiscoveryClient, EurekaDiscovery, LeaseRenewal};
use cb_center::{CenterApplication, InstanceStatus, ServiceInstance};
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn eureka(server: &MockServer) -> EurekaDiscovery {
    EurekaDiscovery::new(
        &format!("{}/eureka/", server.uri()),
        Duration::from_secs(2),
        Duration::from_secs(30),
        Duration::from_secs(90),
    )
    .unwrap()
}

fn instance() -> ServiceInstance {
    ServiceInstance::new("edge-1:cb-center:8080", "cb-center", "edge-1", 8080)
}

fn applications(apps: Value) -> Value {
    json!({ "applications": { "versions__delta": "1", "apps__hashcode": "UP_1_", "application": apps } })
}

/// Registration posts the instance under the upper-case app name
#[tokio::test]
async fn test_register_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/eureka/apps/CB-CENTER"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(json!({
            "instance": {
                "instanceId": "edge-1:cb-center:8080",
                "hostName": "edge-1",
                "app": "CB-CENTER",
                "status": "UP",
                "port": { "$": 8080, "@enabled": "true" },
                "vipAddress": "cb-center",
                "leaseInfo": { "renewalIntervalInSecs": 30, "durationInSecs": 90 }
            }
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    eureka(&server).register(&instance()).await.unwrap();
}

/// A configured IP address is advertised as `ipAddr` next to the host name
#[tokio::test]
async fn test_register_advertises_ip_address() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/eureka/apps/CB-CENTER"))
        .and(body_partial_json(json!({
            "instance": { "hostName": "edge-1", "ipAddr": "10.0.0.8" }
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut local = instance();
    local.ip_address = Some("10.0.0.8".to_string());
    eureka(&server).register(&local).await.unwrap();
}

/// A rejected registration is a discovery error
#[tokio::test]
async fn test_register_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = eureka(&server).register(&instance()).await.unwrap_err();
    assert!(err.to_string().contains("rejected"));
}

/// Heartbeat maps 200 to renewed and 404 to an unknown instance
#[tokio::test]
async fn test_renew_outcomes() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/eureka/apps/CB-CENTER/edge-1:cb-center:8080"))
        .and(query_param("status", "UP"))
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = eureka(&server);
    assert_eq!(client.renew(&instance()).await.unwrap(), LeaseRenewal::Renewed);
    assert_eq!(
        client.renew(&instance()).await.unwrap(),
        LeaseRenewal::UnknownInstance
    );
}

/// Deregistering an instance the registry already forgot succeeds
#[tokio::test]
async fn test_deregister_tolerates_missing_instance() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/eureka/apps/CB-CENTER/edge-1:cb-center:8080"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    eureka(&server).deregister(&instance()).await.unwrap();
}

/// Fetch accepts both list and single-object shapes
#[tokio::test]
async fn test_fetch_instances() {
    let server = MockServer::start().await;
    let body = applications(json!([
        {
            "name": "USERS",
            "instance": [
                {
                    "instanceId": "u1",
                    "hostName": "10.0.0.1",
                    "app": "USERS",
                    "status": "UP",
                    "port": { "$": 8081, "@enabled": "true" }
                },
                {
                    "instanceId": "u2",
                    "hostName": "10.0.0.2",
                    "app": "USERS",
                    "status": "DOWN",
                    "port": { "$": 8081, "@enabled": "true" }
                }
            ]
        },
        {
            "name": "ORDERS",
            "instance": {
                "hostName": "10.0.0.3",
                "app": "ORDERS",
                "status": "UP",
                "port": { "$": "9000", "@enabled": "true" }
            }
        }
    ]));
    Mock::given(method("GET"))
        .and(path("/eureka/apps"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let mut instances = eureka(&server).fetch_instances().await.unwrap();
    instances.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));

    assert_eq!(instances.len(), 3);
    let orders = &instances[0];
    assert_eq!(orders.service_id, "orders");
    assert_eq!(orders.instance_id, "10.0.0.3:orders:9000");
    assert_eq!(orders.base_url(), "http://10.0.0.3:9000");

    assert_eq!(instances[1].service_id, "users");
    assert_eq!(instances[1].status, InstanceStatus::Up);
    assert_eq!(instances[2].status, InstanceStatus::Down);
}

/// An unreachable registry surfaces as a discovery error
#[tokio::test]
async fn test_fetch_from_unreachable_registry() {
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let client = EurekaDiscovery::new(
        &format!("http://{}/eureka", closed),
        Duration::from_secs(1),
        Duration::from_secs(30),
        Duration::from_secs(90),
    )
    .unwrap();

    let err = client.fetch_instances().await.unwrap_err();
    assert!(err.to_string().contains("Registry fetch failed"));
}

/// The center registers, discovers `USERS` and proxies to it, then deregisters
#[tokio::test]
async fn test_center_with_eureka_registry() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(200).set_body_string("alice"))
        .expect(1)
        .mount(&upstream)
        .await;
    let upstream_port = upstream.address().port();

    let registry = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/eureka/apps/CB-CENTER"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&registry)
        .await;
    Mock::given(method("GET"))
        .and(path("/eureka/apps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(applications(json!({
            "name": "USERS",
            "instance": {
                "instanceId": "users-1",
                "hostName": "127.0.0.1",
                "app": "USERS",
                "status": "UP",
                "port": { "$": upstream_port, "@enabled": "true" }
            }
        }))))
        .mount(&registry)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&registry)
        .await;
    Mock::given(method("DELETE"))
        .and(path_regex(r"^/eureka/apps/CB-CENTER/.+$"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&registry)
        .await;

    let args = vec![
        "--server.address=127.0.0.1".to_string(),
        "--server.port=0".to_string(),
        "--metrics.enabled=false".to_string(),
        "--static_resources.enabled=false".to_string(),
        "--logging.format=text".to_string(),
        "--discovery.registry.type=eureka".to_string(),
        format!("--discovery.registry.service_url={}/eureka", registry.uri()),
        "--discovery.instance.hostname=127.0.0.1".to_string(),
    ];
    let running = CenterApplication::from_args(args).unwrap().start().await.unwrap();
    assert!(running.is_registered());

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let response = client
        .get(format!("http://{}/users/me", running.local_addr()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "alice");

    let health: Value = client
        .get(format!("http://{}/actuator/health", running.local_addr()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["components"]["discovery"]["details"]["backend"], "eureka");
    assert_eq!(health["components"]["discovery"]["details"]["services"], 1);

    running.shutdown().await.unwrap();
}

/// A registry that rejects registration leaves the center serving, degraded
#[tokio::test]
async fn test_center_runs_degraded_when_registration_fails() {
    let registry = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&registry)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&registry)
        .await;

    let args = vec![
        "--server.address=127.0.0.1".to_string(),
        "--server.port=0".to_string(),
        "--metrics.enabled=false".to_string(),
        "--static_resources.enabled=false".to_string(),
        "--discovery.registry.type=eureka".to_string(),
        format!("--discovery.registry.service_url={}/eureka", registry.uri()),
    ];
    let running = CenterApplication::from_args(args).unwrap().start().await.unwrap();
    assert!(!running.is_registered());

    let health: Value = reqwest::Client::builder()
        .no_proxy()
        .build()
        .unwrap()
        .get(format!("http://{}/actuator/health", running.local_addr()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "UP");
    assert_eq!(health["components"]["discovery"]["status"], "DEGRADED");
    assert_eq!(health["components"]["discovery"]["details"]["registered"], false);

    running.shutdown().await.unwrap();
}
