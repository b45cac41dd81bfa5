//! Header rules applied between client and upstream.

use axum::http::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, HOST};
use std::net::IpAddr;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const X_FORWARDED_PORT: &str = "x-forwarded-port";
pub const X_FORWARDED_PREFIX: &str = "x-forwarded-prefix";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Connection-scoped headers never forwarded in either direction
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName, listed: &[String]) -> bool {
    HOP_BY_HOP.contains(&name.as_str()) || listed.iter().any(|l| l == name.as_str())
}

/// Header names listed in `Connection: a, b`
fn connection_listed(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

fn copy_filtered(source: &HeaderMap, sensitive: &[String], drop: impl Fn(&HeaderName) -> bool) -> HeaderMap {
    let listed = connection_listed(source);
    let mut headers = HeaderMap::with_capacity(source.len());

    for (name, value) in source {
        if is_hop_by_hop(name, &listed)
            || sensitive.iter().any(|s| s == name.as_str())
            || drop(name)
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// Lower-case a sensitive header list for comparison with `HeaderName`s
pub fn normalize_names(names: &[String]) -> Vec<String> {
    names.iter().map(|n| n.trim().to_ascii_lowercase()).collect()
}

/// Client headers to send upstream
pub fn upstream_request_headers(incoming: &HeaderMap, sensitive: &[String], keep_host: bool) -> HeaderMap {
    copy_filtered(incoming, sensitive, |name| {
        *name == CONTENT_LENGTH || (*name == HOST && !keep_host)
    })
}

/// Upstream headers to return to the client
pub fn client_response_headers(upstream: &HeaderMap, sensitive: &[String]) -> HeaderMap {
    copy_filtered(upstream, sensitive, |_| false)
}

/// What the upstream should learn about the original request
#[derive(Debug, Clone)]
pub struct ForwardedInfo {
    /// Original `Host` header
    pub host: Option<String>,
    pub proto: String,
    pub port: u16,
    /// Path prefix removed before forwarding
    pub prefix: String,
    pub client_ip: Option<IpAddr>,
}

impl ForwardedInfo {
    /// Derive from the incoming headers; the port falls back to the scheme default
    pub fn from_request(headers: &HeaderMap, prefix: &str, client_ip: Option<IpAddr>) -> Self {
        let host = headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let proto = "http".to_string();

        let port = host
            .as_deref()
            .and_then(|h| h.rsplit_once(':'))
            .and_then(|(_, port)| port.parse().ok())
            .unwrap_or(80);

        Self {
            host,
            proto,
            port,
            prefix: prefix.to_string(),
            client_ip,
        }
    }
}

fn append_value(headers: &mut HeaderMap, name: &'static str, value: &str) {
    let combined = match headers.get(name).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.is_empty() => format!("{}, {}", existing, value),
        _ => value.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&combined) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

/// Add `X-Forwarded-*`, extending values set by proxies in front of us
pub fn add_forwarded_headers(headers: &mut HeaderMap, info: &ForwardedInfo) {
    if let Some(host) = &info.host {
        append_value(headers, X_FORWARDED_HOST, host);
    }
    append_value(headers, X_FORWARDED_PROTO, &info.proto);
    append_value(headers, X_FORWARDED_PORT, &info.port.to_string());

    if !info.prefix.is_empty() {
        let prefix = match headers.get(X_FORWARDED_PREFIX).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{}{}", existing.trim_end_matches('/'), info.prefix),
            None => info.prefix.clone(),
        };
        if let Ok(value) = HeaderValue::from_str(&prefix) {
            headers.insert(HeaderName::from_static(X_FORWARDED_PREFIX), value);
        }
    }

    if let Some(ip) = info.client_ip {
        append_value(headers, X_FORWARDED_FOR, &ip.to_string());
    }
}

/// Existing `X-Request-Id`, or a new one inserted into `headers`
pub fn ensure_request_id(headers: &mut HeaderMap) -> String {
    if let Some(id) = headers.get(X_REQUEST_ID).and_then(|v| v.to_str().ok()) {
        if !id.is_empty() {
            return id.to_string();
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&id) {
        headers.insert(HeaderName::from_static(X_REQUEST_ID), value);
    }
    id
}
