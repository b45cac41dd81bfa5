//! # Proxy Engine
//!
//! Forwards a request that matched a route:
//!
//! 1. resolve the upstream base URL (fixed URL or a balanced instance)
//! 2. buffer the body up to `server.max_request_size`
//! 3. rewrite headers and send with `reqwest`
//! 4. stream the upstream response back
//!
//! Failures map to gateway status codes: 503 without an instance, 502 when
//! the upstream cannot be reached, 504 after `proxy.read_timeout` and 413
//! for an oversized body.

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::CONTENT_LENGTH;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use http_body_util::LengthLimitError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::core::config::CenterConfig;
use crate::core::error::{CenterError, CenterResult};
use crate::discovery::registry::ServiceRegistry;
use crate::load_balancing::{create_load_balancer, LoadBalancer};
use crate::observability::metrics::record_proxy_request;
use crate::proxy::headers::{
    add_forwarded_headers, client_response_headers, ensure_request_id, normalize_names,
    upstream_request_headers, ForwardedInfo, X_REQUEST_ID,
};
use crate::routing::router::{RouteLocator, RouteMatch, RouteTarget};

/// Forwards matched requests to upstreams
pub struct ProxyEngine {
    locator: Arc<RouteLocator>,
    registry: Option<Arc<ServiceRegistry>>,
    balancer: Arc<dyn LoadBalancer>,
    client: reqwest::Client,
    sensitive_headers: Vec<String>,
    add_proxy_headers: bool,
    add_host_header: bool,
    max_request_size: usize,
    read_timeout: Duration,
}

impl ProxyEngine {
    /// `registry` is `None` when the discovery client is disabled; service
    /// routes then answer 503 and only URL routes work
    pub fn new(
        config: &CenterConfig,
        locator: Arc<RouteLocator>,
        registry: Option<Arc<ServiceRegistry>>,
    ) -> CenterResult<Self> {
        let proxy = &config.proxy;

        let client = reqwest::Client::builder()
            .connect_timeout(proxy.connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|e| CenterError::internal(format!("Failed to build upstream client: {}", e)))?;

        Ok(Self {
            locator,
            registry,
            balancer: create_load_balancer(proxy.load_balancer),
            client,
            sensitive_headers: normalize_names(&proxy.sensitive_headers),
            add_proxy_headers: proxy.add_proxy_headers,
            add_host_header: proxy.add_host_header,
            max_request_size: config.server.max_request_size,
            read_timeout: proxy.read_timeout,
        })
    }

    pub fn locator(&self) -> &Arc<RouteLocator> {
        &self.locator
    }

    pub fn balancer(&self) -> &Arc<dyn LoadBalancer> {
        &self.balancer
    }

    /// Route lookup for a request path
    pub fn locate(&self, path: &str) -> Option<RouteMatch> {
        self.locator.locate(path)
    }

    /// Forward and always produce a response; errors become JSON bodies
    pub async fn handle(
        &self,
        matched: RouteMatch,
        request: Request,
        remote_addr: Option<SocketAddr>,
    ) -> Response {
        let started = Instant::now();
        let route_id = matched.route.id.clone();

        let response = match self.forward(matched, request, remote_addr).await {
            Ok(response) => response,
            Err(e) => {
                warn!(route = %route_id, error = %e, "Proxy request failed");
                e.into_response()
            }
        };

        record_proxy_request(&route_id, response.status().as_u16(), started.elapsed());
        response
    }

    /// Base URL of the upstream, without trailing slash
    fn upstream_base(&self, target: &RouteTarget) -> CenterResult<String> {
        match target {
            RouteTarget::Url(url) => Ok(url.as_str().trim_end_matches('/').to_string()),
            RouteTarget::Service(service_id) => {
                let registry = self.registry.as_ref().ok_or_else(|| {
                    CenterError::service_unavailable(service_id.as_str(), "discovery client is disabled")
                })?;
                let instances = registry.available_instances(service_id);
                let instance = self
                    .balancer
                    .select(service_id, &instances)
                    .ok_or_else(|| CenterError::service_unavailable(service_id.as_str(), "no available instances"))?;
                Ok(instance.base_url())
            }
        }
    }

    async fn forward(
        &self,
        matched: RouteMatch,
        request: Request,
        remote_addr: Option<SocketAddr>,
    ) -> CenterResult<Response> {
        let route = matched.route;
        let base = self.upstream_base(&route.target)?;

        let (parts, body) = request.into_parts();
        let url = match parts.uri.query() {
            Some(query) => format!("{}{}?{}", base, matched.target_path, query),
            None => format!("{}{}", base, matched.target_path),
        };

        let declared_length = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared_length.map_or(false, |len| len > self.max_request_size) {
            return Err(CenterError::PayloadTooLarge {
                limit: self.max_request_size,
            });
        }
        let body = axum::body::to_bytes(body, self.max_request_size)
            .await
            .map_err(|e| body_read_error(e, self.max_request_size))?;

        let sensitive = match &route.sensitive_headers {
            Some(names) => normalize_names(names),
            None => self.sensitive_headers.clone(),
        };

        let mut headers = upstream_request_headers(&parts.headers, &sensitive, self.add_host_header);
        if self.add_proxy_headers {
            let info = ForwardedInfo::from_request(
                &parts.headers,
                &matched.forwarded_prefix,
                remote_addr.map(|addr| addr.ip()),
            );
            add_forwarded_headers(&mut headers, &info);
        }
        let request_id = if self.add_proxy_headers {
            Some(ensure_request_id(&mut headers))
        } else {
            None
        };

        debug!(
            request_id = request_id.as_deref(),
            route = %route.id,
            method = %parts.method,
            upstream = %url,
            "Forwarding request"
        );

        let send = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send();

        let upstream = match tokio::time::timeout(self.read_timeout, send).await {
            Err(_) => {
                return Err(CenterError::Timeout {
                    timeout_ms: self.read_timeout.as_millis() as u64,
                })
            }
            Ok(Err(e)) if e.is_timeout() => {
                return Err(CenterError::Timeout {
                    timeout_ms: self.read_timeout.as_millis() as u64,
                })
            }
            Ok(Err(e)) if e.is_connect() => {
                return Err(CenterError::upstream(format!("cannot connect to {}: {}", base, e)))
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(response)) => response,
        };

        let status = upstream.status();
        let mut response_headers = client_response_headers(upstream.headers(), &sensitive);
        if let Some(value) = request_id.as_deref().and_then(|id| HeaderValue::from_str(id).ok()) {
            response_headers.insert(X_REQUEST_ID, value);
        }

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;

        debug!(
            request_id = request_id.as_deref(),
            status = status.as_u16(),
            "Upstream responded"
        );
        Ok(response)
    }
}

/// Only the body limit maps to 413; a body the client broke off is a 400
fn body_read_error(err: axum::Error, limit: usize) -> CenterError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&err);
    while let Some(cause) = source {
        if cause.is::<LengthLimitError>() {
            return CenterError::PayloadTooLarge { limit };
        }
        source = cause.source();
    }
    CenterError::BadRequest {
        message: format!("failed to read request body: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RouteDefinition;
    use crate::core::types::{InstanceStatus, ServiceInstance};
    use crate::discovery::client::StaticDiscovery;
    use axum::http::StatusCode;

    fn engine(config: &CenterConfig, registry: Option<Arc<ServiceRegistry>>) -> ProxyEngine {
        let locator = Arc::new(RouteLocator::new(config).unwrap());
        if let Some(registry) = &registry {
            locator.refresh(&registry.service_ids());
        }
        ProxyEngine::new(config, locator, registry).unwrap()
    }

    fn request(path: &str) -> Request {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_no_available_instance_is_503() {
        let registry = Arc::new(ServiceRegistry::new(Arc::new(StaticDiscovery::new())));
        registry.replace_instances(vec![
            ServiceInstance::new("a", "users", "127.0.0.1", 1).with_status(InstanceStatus::Down),
        ]);

        let engine = engine(&CenterConfig::default(), Some(registry));
        let matched = engine.locate("/users/1").unwrap();
        let response = engine.handle(matched, request("/users/1"), None).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_service_route_without_discovery_is_503() {
        let mut config = CenterConfig::default();
        config.proxy.routes.insert(
            "users".to_string(),
            RouteDefinition {
                path: "/users/**".to_string(),
                service_id: None,
                url: None,
                strip_prefix: true,
                sensitive_headers: None,
            },
        );

        let engine = engine(&config, None);
        let matched = engine.locate("/users/1").unwrap();
        let response = engine.handle(matched, request("/users/1"), None).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_declared_oversized_body_is_413() {
        let mut config = CenterConfig::default();
        config.server.max_request_size = 4;
        config.proxy.routes.insert(
            "echo".to_string(),
            RouteDefinition {
                path: "/echo/**".to_string(),
                service_id: None,
                url: Some("http://127.0.0.1:9".to_string()),
                strip_prefix: true,
                sensitive_headers: None,
            },
        );

        let engine = engine(&config, None);
        let matched = engine.locate("/echo").unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/echo")
            .header("content-length", "10")
            .body(Body::from("0123456789"))
            .unwrap();

        let response = engine.handle(matched, request, None).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_body_read_errors() {
        let limited = axum::body::to_bytes(Body::from("x".repeat(64)), 16)
            .await
            .unwrap_err();
        assert!(matches!(
            body_read_error(limited, 16),
            CenterError::PayloadTooLarge { limit: 16 }
        ));

        let aborted = axum::Error::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "client went away",
        ));
        let err = body_read_error(aborted, 16);
        assert!(matches!(err, CenterError::BadRequest { .. }));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
