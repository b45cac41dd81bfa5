//! # Router Module
//!
//! Maps request paths to proxy routes.
//!
//! Three path shapes are supported:
//!
//! - `/orders/summary`: exact
//! - `/orders/*`: exactly one more segment
//! - `/orders/**` (and `/**`): the prefix and anything below it
//!
//! Exact and one-segment routes live in a `matchit` radix tree. Prefix
//! routes are kept ordered by literal length so the most specific prefix
//! wins. A lookup tries the radix tree first.
//!
//! The table is immutable. [`RouteLocator`] swaps in a new `Arc<RouteTable>`
//! whenever the set of discovered services changes, so a request keeps a
//! consistent table for its whole lifetime.

use matchit::Router as RadixRouter;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::core::config::{parse_endpoint_url, CenterConfig};
use crate::core::error::{CenterError, CenterResult};
use crate::discovery::registry::{RegistryEvent, ServiceRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternKind {
    Exact,
    Segment,
    Prefix,
}

/// A parsed route path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    kind: PatternKind,
    literal: String,
}

impl PathPattern {
    pub fn parse(path: &str) -> CenterResult<Self> {
        let raw = path.trim();
        if !raw.starts_with('/') {
            return Err(CenterError::config(format!("path '{}' must start with '/'", raw)));
        }

        let (kind, literal) = if raw == "/**" {
            (PatternKind::Prefix, "")
        } else if let Some(literal) = raw.strip_suffix("/**") {
            (PatternKind::Prefix, literal)
        } else if let Some(literal) = raw.strip_suffix("/*") {
            (PatternKind::Segment, literal)
        } else if raw.len() > 1 {
            (PatternKind::Exact, raw.trim_end_matches('/'))
        } else {
            (PatternKind::Exact, "/")
        };

        if literal.contains('*') {
            return Err(CenterError::config(format!(
                "path '{}' may only use '*' or '**' as its last segment",
                raw
            )));
        }
        if literal.contains(':') || literal.contains('{') || literal.contains('}') {
            return Err(CenterError::config(format!(
                "path '{}' contains reserved characters",
                raw
            )));
        }
        if literal.len() > 1 && literal[1..].split('/').any(str::is_empty) {
            return Err(CenterError::config(format!("path '{}' has an empty segment", raw)));
        }

        Ok(Self {
            raw: raw.to_string(),
            kind,
            literal: literal.to_string(),
        })
    }

    /// The path as configured
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Leading literal part, e.g. `/orders` for `/orders/**`
    pub fn literal(&self) -> &str {
        &self.literal
    }

    pub fn has_wildcard(&self) -> bool {
        self.kind != PatternKind::Exact
    }

    /// Match a normalized path (no trailing slash except for `/`)
    pub fn matches(&self, path: &str) -> bool {
        match self.kind {
            PatternKind::Exact => path == self.literal,
            PatternKind::Segment => path
                .strip_prefix(self.literal.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .map(|rest| !rest.is_empty() && !rest.contains('/'))
                .unwrap_or(false),
            PatternKind::Prefix => is_under(path, &self.literal),
        }
    }

    /// Radix tree path for exact and one-segment patterns
    fn radix_path(&self) -> Option<String> {
        match self.kind {
            PatternKind::Exact => Some(self.literal.clone()),
            PatternKind::Segment => Some(format!("{}/:segment", self.literal)),
            PatternKind::Prefix => None,
        }
    }
}

/// `path` equals `prefix` or continues it at a segment boundary
fn is_under(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn normalize(path: &str) -> &str {
    if path.len() > 1 {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            "/"
        } else {
            trimmed
        }
    } else {
        path
    }
}

/// Simple `*` wildcard match used for service names
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !text.starts_with(first) || text.len() < first.len() + last.len() {
        return false;
    }

    let mut rest = &text[first.len()..];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(index) => rest = &rest[index + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

/// Where a route sends traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// A discovered service, balanced over its instances
    Service(String),
    /// A fixed upstream
    Url(Url),
}

impl std::fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteTarget::Service(service_id) => write!(f, "{}", service_id),
            RouteTarget::Url(url) => write!(f, "{}", url),
        }
    }
}

/// One proxy route
#[derive(Debug, Clone)]
pub struct ProxyRoute {
    pub id: String,
    /// Path without the global prefix
    pub pattern: PathPattern,
    /// Path including the global prefix; this is what requests match
    pub full_pattern: PathPattern,
    pub target: RouteTarget,
    pub strip_prefix: bool,
    pub sensitive_headers: Option<Vec<String>>,
    /// Created from a discovered service rather than configuration
    pub discovered: bool,
}

/// Actuator view of a route
#[derive(Debug, Clone, Serialize)]
pub struct RouteDescription {
    pub id: String,
    pub path: String,
    pub target: String,
    pub discovered: bool,
}

/// Result of locating a route for a request path
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<ProxyRoute>,
    /// Path to request upstream
    pub target_path: String,
    /// Part of the request path removed before forwarding
    pub forwarded_prefix: String,
}

/// Immutable route table
pub struct RouteTable {
    routes: Vec<Arc<ProxyRoute>>,
    radix: RadixRouter<usize>,
    /// Indices of prefix routes, longest literal first
    prefixed: Vec<usize>,
}

impl RouteTable {
    fn empty() -> Self {
        Self {
            routes: Vec::new(),
            radix: RadixRouter::new(),
            prefixed: Vec::new(),
        }
    }

    fn insert(&mut self, route: ProxyRoute) -> CenterResult<()> {
        let index = self.routes.len();

        match route.full_pattern.radix_path() {
            Some(path) => {
                self.radix.insert(path, index).map_err(|e| {
                    CenterError::config(format!(
                        "route '{}' ({}) conflicts with an existing route: {}",
                        route.id,
                        route.full_pattern.as_str(),
                        e
                    ))
                })?;
            }
            None => {
                let literal = route.full_pattern.literal();
                if let Some(existing) = self
                    .prefixed
                    .iter()
                    .map(|i| &self.routes[*i])
                    .find(|r| r.full_pattern.literal() == literal)
                {
                    return Err(CenterError::config(format!(
                        "route '{}' ({}) conflicts with route '{}'",
                        route.id,
                        route.full_pattern.as_str(),
                        existing.id
                    )));
                }
                self.routes.push(Arc::new(route));
                self.prefixed.push(index);
                let routes = &self.routes;
                self.prefixed.sort_by(|a, b| {
                    let len_a = routes[*a].full_pattern.literal().len();
                    let len_b = routes[*b].full_pattern.literal().len();
                    len_b.cmp(&len_a)
                });
                return Ok(());
            }
        }

        self.routes.push(Arc::new(route));
        Ok(())
    }

    fn find(&self, path: &str) -> Option<&Arc<ProxyRoute>> {
        if let Ok(matched) = self.radix.at(path) {
            return self.routes.get(*matched.value);
        }
        self.prefixed
            .iter()
            .map(|i| &self.routes[*i])
            .find(|route| route.full_pattern.matches(path))
    }

    pub fn routes(&self) -> &[Arc<ProxyRoute>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Resolves request paths to routes and keeps default routes current
pub struct RouteLocator {
    prefix: String,
    strip_global_prefix: bool,
    application_name: String,
    ignored_services: Vec<String>,
    ignored_patterns: Vec<PathPattern>,
    configured: Vec<ProxyRoute>,
    table: RwLock<Arc<RouteTable>>,
}

impl RouteLocator {
    /// Build the locator from configured routes; conflicts are errors
    pub fn new(config: &CenterConfig) -> CenterResult<Self> {
        let proxy = &config.proxy;
        let prefix = proxy.prefix.trim_end_matches('/').to_string();

        let mut configured = Vec::new();
        for (id, definition) in &proxy.routes {
            let pattern = PathPattern::parse(&definition.path)?;
            let full_pattern = PathPattern::parse(&format!("{}{}", prefix, pattern.as_str()))?;

            let target = match (&definition.url, &definition.service_id) {
                (Some(url), _) => RouteTarget::Url(parse_endpoint_url(url)?),
                (None, Some(service_id)) => RouteTarget::Service(service_id.to_ascii_lowercase()),
                (None, None) => RouteTarget::Service(id.to_ascii_lowercase()),
            };

            configured.push(ProxyRoute {
                id: id.clone(),
                pattern,
                full_pattern,
                target,
                strip_prefix: definition.strip_prefix,
                sensitive_headers: definition.sensitive_headers.clone(),
                discovered: false,
            });
        }

        let ignored_patterns = proxy
            .ignored_patterns
            .iter()
            .map(|p| PathPattern::parse(p))
            .collect::<CenterResult<Vec<_>>>()?;

        let mut table = RouteTable::empty();
        for route in &configured {
            table.insert(route.clone())?;
        }

        Ok(Self {
            prefix,
            strip_global_prefix: proxy.strip_prefix,
            application_name: config.application.name.to_ascii_lowercase(),
            ignored_services: proxy.ignored_services.clone(),
            ignored_patterns,
            configured,
            table: RwLock::new(Arc::new(table)),
        })
    }

    /// Current table snapshot
    pub fn table(&self) -> Arc<RouteTable> {
        self.table.read().clone()
    }

    pub fn routes(&self) -> Vec<RouteDescription> {
        self.table()
            .routes()
            .iter()
            .map(|route| RouteDescription {
                id: route.id.clone(),
                path: route.full_pattern.as_str().to_string(),
                target: route.target.to_string(),
                discovered: route.discovered,
            })
            .collect()
    }

    fn is_ignored_service(&self, service_id: &str) -> bool {
        service_id == self.application_name
            || self
                .ignored_services
                .iter()
                .any(|pattern| wildcard_match(&pattern.to_ascii_lowercase(), service_id))
    }

    /// Rebuild the table with a default route for each discovered service
    pub fn refresh(&self, service_ids: &[String]) -> usize {
        let mut table = RouteTable::empty();
        for route in &self.configured {
            // Already validated in `new`
            if let Err(e) = table.insert(route.clone()) {
                warn!(error = %e, "Skipping configured route");
            }
        }

        let configured_paths: BTreeSet<&str> =
            self.configured.iter().map(|r| r.pattern.as_str()).collect();

        for service_id in service_ids {
            let service_id = service_id.to_ascii_lowercase();
            if self.is_ignored_service(&service_id) {
                debug!(service_id = %service_id, "No default route for ignored service");
                continue;
            }

            let path = format!("/{}/**", service_id);
            if configured_paths.contains(path.as_str()) {
                continue;
            }

            let route = PathPattern::parse(&path).and_then(|pattern| {
                let full_pattern = PathPattern::parse(&format!("{}{}", self.prefix, path))?;
                Ok(ProxyRoute {
                    id: service_id.clone(),
                    pattern,
                    full_pattern,
                    target: RouteTarget::Service(service_id.clone()),
                    strip_prefix: true,
                    sensitive_headers: None,
                    discovered: true,
                })
            });

            match route.and_then(|route| table.insert(route)) {
                Ok(()) => {}
                Err(e) => warn!(service_id = %service_id, error = %e, "Skipping default route"),
            }
        }

        let count = table.len();
        *self.table.write() = Arc::new(table);
        info!(routes = count, "Route table rebuilt");
        count
    }

    /// Find the route for a request path and compute the upstream path
    pub fn locate(&self, path: &str) -> Option<RouteMatch> {
        let normalized = normalize(path);

        if self.ignored_patterns.iter().any(|p| p.matches(normalized)) {
            debug!(path = %path, "Path is ignored by the proxy");
            return None;
        }

        let table = self.table();
        let route = table.find(normalized)?.clone();

        let after_global = if self.prefix.is_empty() {
            path
        } else {
            path.strip_prefix(self.prefix.as_str()).unwrap_or(path)
        };

        let literal = route.pattern.literal();
        let (after_route, route_stripped) = if route.strip_prefix && route.pattern.has_wildcard() {
            match after_global.strip_prefix(literal) {
                Some(rest) if rest.is_empty() || rest.starts_with('/') => (rest, true),
                _ => (after_global, false),
            }
        } else {
            (after_global, false)
        };

        let mut target_path = String::new();
        let mut forwarded_prefix = String::new();
        if self.strip_global_prefix {
            forwarded_prefix.push_str(&self.prefix);
        } else {
            target_path.push_str(&self.prefix);
        }
        if route_stripped {
            forwarded_prefix.push_str(literal);
        }
        target_path.push_str(after_route);
        if target_path.is_empty() {
            target_path.push('/');
        }

        Some(RouteMatch {
            route,
            target_path,
            forwarded_prefix,
        })
    }

    /// Rebuild the table whenever the registry reports new service ids
    pub fn watch_registry(
        self: &Arc<Self>,
        registry: Arc<ServiceRegistry>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let locator = self.clone();
        let mut events = registry.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(RegistryEvent::ServicesChanged { service_ids }) => {
                            locator.refresh(&service_ids);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Missed registry events, rebuilding from cache");
                            locator.refresh(&registry.service_ids());
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!("Route watcher stopped");
        })
    }
}
