//! # HTTP Server
//!
//! The axum application the center serves:
//!
//! - `/actuator/health`, `/actuator/info`, `/actuator/routes` and
//!   `/actuator/prometheus`
//! - everything else goes to the fallback, which tries the proxy, then the
//!   static resource directory, then answers a JSON 404
//!
//! `TraceLayer` opens a span per request and `TimeoutLayer` bounds the
//! whole exchange by `server.request_timeout`.

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router as AxumRouter};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::core::config::{Capabilities, CenterConfig};
use crate::core::error::CenterError;
use crate::discovery::agent::DiscoveryAgent;
use crate::discovery::registry::ServiceRegistry;
use crate::gateway::lifecycle::{Lifecycle, LifecycleState};
use crate::proxy::ProxyEngine;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<CenterConfig>,
    pub capabilities: Capabilities,
    pub lifecycle: Arc<Lifecycle>,
    pub registry: Option<Arc<ServiceRegistry>>,
    pub agent: Option<Arc<DiscoveryAgent>>,
    pub proxy: Option<Arc<ProxyEngine>>,
    pub metrics: Option<PrometheusHandle>,
    pub static_dir: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(config: Arc<CenterConfig>, lifecycle: Arc<Lifecycle>) -> Self {
        let static_dir = config
            .static_resources
            .enabled
            .then(|| config.static_resources.directory.clone());

        Self {
            capabilities: config.capabilities(),
            config,
            lifecycle,
            registry: None,
            agent: None,
            proxy: None,
            metrics: None,
            static_dir,
            started_at: Utc::now(),
        }
    }
}

/// Build the application router
pub fn build_app(state: ServerState) -> AxumRouter {
    let request_timeout = state.config.server.request_timeout;

    AxumRouter::new()
        .route("/actuator/health", get(health))
        .route("/actuator/info", get(info))
        .route("/actuator/routes", get(routes))
        .route("/actuator/prometheus", get(prometheus))
        .fallback(handle_request)
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}

/// Proxy, then static resources, then 404
async fn handle_request(State(state): State<ServerState>, request: Request) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let path = request.uri().path().to_string();

    if let Some(proxy) = &state.proxy {
        if let Some(matched) = proxy.locate(&path) {
            return proxy.handle(matched, request, remote_addr).await;
        }
    }

    if let Some(dir) = &state.static_dir {
        if request.method() == Method::GET || request.method() == Method::HEAD {
            let response = ServeDir::new(dir)
                .oneshot(request)
                .await
                .unwrap_or_else(|never| match never {});
            if response.status() != StatusCode::NOT_FOUND {
                return response.map(Body::new);
            }
        }
    }

    debug!(path = %path, "No route or resource for request");
    CenterError::RouteNotFound { path }.into_response()
}

fn discovery_component(state: &ServerState) -> Value {
    let Some(registry) = &state.registry else {
        return json!({ "status": "DISABLED" });
    };

    let stats = registry.stats();
    let (registered, registers_self) = state
        .agent
        .as_ref()
        .map(|agent| (agent.is_registered(), agent.registers_self()))
        .unwrap_or((false, false));

    let status = if registers_self && !registered {
        "DEGRADED"
    } else {
        "UP"
    };

    json!({
        "status": status,
        "details": {
            "backend": registry.client().description(),
            "registered": registered,
            "instanceId": state.agent.as_ref().map(|a| a.local_instance().instance_id.clone()),
            "services": stats.total_services,
            "instances": stats.total_instances,
            "lastRefresh": stats.last_refresh.map(|t| t.to_rfc3339()),
        }
    })
}

fn proxy_component(state: &ServerState) -> Value {
    match &state.proxy {
        Some(proxy) => json!({
            "status": "UP",
            "details": {
                "routes": proxy.locator().table().len(),
                "loadBalancer": proxy.balancer().algorithm_name(),
            }
        }),
        None => json!({ "status": "DISABLED" }),
    }
}

/// Health handler
async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    let (status_code, status) = match state.lifecycle.state() {
        LifecycleState::Started => (StatusCode::OK, "UP"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "DOWN"),
    };

    let body = json!({
        "status": status,
        "components": {
            "discovery": discovery_component(&state),
            "proxy": proxy_component(&state),
        }
    });

    (status_code, Json(body))
}

/// Info handler
async fn info(State(state): State<ServerState>) -> impl IntoResponse {
    Json(json!({
        "app": {
            "name": state.config.application.name,
            "version": env!("CARGO_PKG_VERSION"),
        },
        "capabilities": {
            "discoveryClientEnabled": state.capabilities.discovery_client_enabled,
            "reverseProxyEnabled": state.capabilities.reverse_proxy_enabled,
        },
        "state": state.lifecycle.state(),
        "startedAt": state.started_at.to_rfc3339(),
    }))
}

/// Effective route patterns and their targets
async fn routes(State(state): State<ServerState>) -> Response {
    let Some(proxy) = &state.proxy else {
        return CenterError::RouteNotFound {
            path: "/actuator/routes".to_string(),
        }
        .into_response();
    };

    let mut body = Map::new();
    for route in proxy.locator().routes() {
        body.insert(route.path, Value::String(route.target));
    }
    Json(Value::Object(body)).into_response()
}

/// Prometheus scrape endpoint
async fn prometheus(State(state): State<ServerState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => CenterError::RouteNotFound {
            path: "/actuator/prometheus".to_string(),
        }
        .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ServiceInstance;
    use crate::discovery::client::StaticDiscovery;
    use crate::routing::RouteLocator;
    use axum_test::TestServer;

    fn started_state(config: CenterConfig) -> ServerState {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle
            .transition(LifecycleState::NotStarted, LifecycleState::Started)
            .unwrap();
        ServerState::new(Arc::new(config), lifecycle)
    }

    #[tokio::test]
    async fn test_health_reports_disabled_components() {
        let mut config = CenterConfig::default();
        config.discovery.enabled = false;
        config.proxy.enabled = false;
        let server = TestServer::new(build_app(started_state(config))).unwrap();

        let response = server.get("/actuator/health").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "UP");
        assert_eq!(body["components"]["discovery"]["status"], "DISABLED");
        assert_eq!(body["components"]["proxy"]["status"], "DISABLED");
    }

    #[tokio::test]
    async fn test_health_is_down_before_start() {
        let state = ServerState::new(Arc::new(CenterConfig::default()), Arc::new(Lifecycle::new()));
        let server = TestServer::new(build_app(state)).unwrap();

        let response = server.get("/actuator/health").await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_routes_and_unknown_path() {
        let config = CenterConfig::default();
        let registry = Arc::new(ServiceRegistry::new(Arc::new(StaticDiscovery::new())));
        registry.replace_instances(vec![ServiceInstance::new("u1", "users", "127.0.0.1", 9)]);

        let locator = Arc::new(RouteLocator::new(&config).unwrap());
        locator.refresh(&registry.service_ids());
        let proxy = ProxyEngine::new(&config, locator, Some(registry.clone())).unwrap();

        let mut state = started_state(config);
        state.static_dir = None;
        state.registry = Some(registry);
        state.proxy = Some(Arc::new(proxy));
        let server = TestServer::new(build_app(state)).unwrap();

        let routes: Value = server.get("/actuator/routes").await.json();
        assert_eq!(routes["/users/**"], "users");

        let response = server.get("/nothing/here").await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body: Value = response.json();
        assert_eq!(body["error"]["type"], "route_not_found");
    }

    #[tokio::test]
    async fn test_prometheus_disabled_is_404() {
        let server = TestServer::new(build_app(started_state(CenterConfig::default()))).unwrap();
        server
            .get("/actuator/prometheus")
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_static_resources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>center</h1>").unwrap();

        let mut state = started_state(CenterConfig::default());
        state.static_dir = Some(dir.path().to_path_buf());
        let server = TestServer::new(build_app(state)).unwrap();

        let response = server.get("/index.html").await;
        response.assert_status_ok();
        assert_eq!(response.text(), "<h1>center</h1>");
    }
}
