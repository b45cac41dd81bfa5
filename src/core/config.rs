//! # Configuration Context
//!
//! The process-wide configuration context: built once at startup from
//! layered sources and read without mutation afterwards.
//!
//! ## Layering (lowest to highest precedence)
//! 1. Built-in defaults (`CenterConfig::default()`)
//! 2. A YAML file named by `--config=<path>` or `CENTER_CONFIG`
//! 3. A fixed table of `CENTER_*` environment variables
//! 4. Command-line overrides: `--server.port=9000`, `--proxy.enabled=false`
//!
//! Every layer is merged into one `serde_json::Value` tree which is then
//! deserialized into [`CenterConfig`] and validated. A value of the wrong
//! type (`--server.port=abc`) or a failed validation rule is a
//! [`CenterError::Configuration`](crate::core::error::CenterError::Configuration), which the entrypoint treats as fatal.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config_error;
use crate::core::error::CenterResult;
use crate::routing::router::PathPattern;

/// Key of the command-line override that names a YAML file
pub const CONFIG_PATH_KEY: &str = "config";

/// Environment variable that names a YAML file
pub const CONFIG_PATH_ENV: &str = "CENTER_CONFIG";

/// Environment variables recognised as overrides, with the key they set
pub const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("CENTER_APPLICATION_NAME", "application.name"),
    ("CENTER_SERVER_ADDRESS", "server.address"),
    ("CENTER_SERVER_PORT", "server.port"),
    ("CENTER_DISCOVERY_ENABLED", "discovery.enabled"),
    ("CENTER_DISCOVERY_REGISTRY", "discovery.registry.type"),
    ("CENTER_DISCOVERY_SERVICE_URL", "discovery.registry.service_url"),
    ("CENTER_PROXY_ENABLED", "proxy.enabled"),
    ("CENTER_PROXY_PREFIX", "proxy.prefix"),
    ("CENTER_LOG_LEVEL", "logging.level"),
    ("CENTER_LOG_FORMAT", "logging.format"),
];

/// The two capabilities the entrypoint activates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Register with the registry and discover other services
    pub discovery_client_enabled: bool,
    /// Forward inbound requests to routed services
    pub reverse_proxy_enabled: bool,
}

/// Complete configuration of the center
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CenterConfig {
    /// Identity of this process
    pub application: ApplicationConfig,

    /// Listener settings
    pub server: ServerConfig,

    /// Discovery client settings
    pub discovery: DiscoveryConfig,

    /// Reverse proxy settings
    pub proxy: ProxyConfig,

    /// Static files served when no route matches
    pub static_resources: StaticResourcesConfig,

    /// Log output
    pub logging: LoggingConfig,

    /// Prometheus metrics
    pub metrics: MetricsConfig,
}

impl CenterConfig {
    /// Build the context from raw process arguments and the process environment
    pub fn from_args<I, S>(args: I) -> CenterResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ConfigLoader::new().with_process_env().with_args(args).load()
    }

    /// Capability flags derived from the configuration
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            discovery_client_enabled: self.discovery.enabled,
            reverse_proxy_enabled: self.proxy.enabled,
        }
    }

    /// Collect every validation problem and fail with all of them at once
    pub fn validate(&self) -> CenterResult<()> {
        let mut errors = Vec::new();

        // Application identity
        let name = &self.application.name;
        if name.trim().is_empty() {
            errors.push("application.name cannot be empty".to_string());
        } else if name.contains('/') || name.chars().any(char::is_whitespace) {
            errors.push(format!("application.name '{}' must not contain '/' or whitespace", name));
        }

        // Server
        if self.server.address.parse::<IpAddr>().is_err() {
            errors.push(format!("server.address '{}' is not an IP address", self.server.address));
        }
        if self.server.max_request_size == 0 {
            errors.push("server.max_request_size must be greater than 0".to_string());
        }
        if self.server.request_timeout.is_zero() {
            errors.push("server.request_timeout must be greater than 0".to_string());
        }

        // Discovery
        if self.discovery.enabled {
            let discovery = &self.discovery;
            if discovery.lease_renewal_interval.is_zero() {
                errors.push("discovery.lease_renewal_interval must be greater than 0".to_string());
            }
            if discovery.registry_fetch_interval.is_zero() {
                errors.push("discovery.registry_fetch_interval must be greater than 0".to_string());
            }
            if discovery.lease_expiration_duration <= discovery.lease_renewal_interval {
                errors.push(
                    "discovery.lease_expiration_duration must be longer than discovery.lease_renewal_interval"
                        .to_string(),
                );
            }

            let instance = &discovery.instance;
            match (&instance.ip_address, instance.prefer_ip_address) {
                (Some(ip), _) if ip.parse::<IpAddr>().is_err() => {
                    errors.push(format!("discovery.instance.ip_address '{}' is not an IP address", ip));
                }
                (None, true) => errors.push(
                    "discovery.instance.prefer_ip_address requires discovery.instance.ip_address".to_string(),
                ),
                _ => {}
            }

            match &discovery.registry {
                RegistryConfig::Static { services } => {
                    for (service_id, urls) in services {
                        for url in urls {
                            if let Err(e) = parse_endpoint_url(url) {
                                errors.push(format!(
                                    "discovery.registry.services.{}: {}",
                                    service_id, e
                                ));
                            }
                        }
                    }
                }
                RegistryConfig::Eureka { service_url, .. } => {
                    if let Err(e) = parse_endpoint_url(service_url) {
                        errors.push(format!("discovery.registry.service_url: {}", e));
                    }
                }
            }
        }

        // Proxy
        let proxy = &self.proxy;
        if !proxy.prefix.is_empty() && !proxy.prefix.starts_with('/') {
            errors.push(format!("proxy.prefix '{}' must start with '/'", proxy.prefix));
        }
        if proxy.connect_timeout.is_zero() || proxy.read_timeout.is_zero() {
            errors.push("proxy.connect_timeout and proxy.read_timeout must be greater than 0".to_string());
        }
        for (id, route) in &proxy.routes {
            if let Err(e) = PathPattern::parse(&route.path) {
                errors.push(format!("proxy.routes.{}.path: {}", id, e));
            }
            match (&route.url, &route.service_id) {
                (Some(_), Some(_)) => {
                    errors.push(format!("proxy.routes.{} sets both url and service_id", id));
                }
                (Some(url), None) => {
                    if let Err(e) = parse_endpoint_url(url) {
                        errors.push(format!("proxy.routes.{}.url: {}", id, e));
                    }
                }
                (None, Some(service_id)) if service_id.trim().is_empty() => {
                    errors.push(format!("proxy.routes.{}.service_id cannot be empty", id));
                }
                _ => {}
            }
        }
        for pattern in &proxy.ignored_patterns {
            if let Err(e) = PathPattern::parse(pattern) {
                errors.push(format!("proxy.ignored_patterns: {}", e));
            }
        }

        // Logging
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => errors.push(format!("Invalid log level: {}", self.logging.level)),
        }

        if !errors.is_empty() {
            return Err(config_error!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            ));
        }

        Ok(())
    }
}

/// Identity of this process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Service id this process registers under
    pub name: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "cb-center".to_string(),
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub address: String,

    /// Bind port (0 picks an ephemeral port)
    pub port: u16,

    /// Maximum request body size forwarded upstream
    pub max_request_size: usize,

    /// Upper bound for handling one request end to end
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Time allowed for in-flight requests to drain on shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8080,
            max_request_size: 10 * 1024 * 1024, // 10MB
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Discovery client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Activates the discovery client capability
    pub enabled: bool,

    /// Registry backend
    pub registry: RegistryConfig,

    /// Register this process with the registry
    pub register_self: bool,

    /// Fetch other services from the registry
    pub fetch_registry: bool,

    /// Heartbeat period
    #[serde(with = "humantime_serde")]
    pub lease_renewal_interval: Duration,

    /// Lease duration advertised to the registry
    #[serde(with = "humantime_serde")]
    pub lease_expiration_duration: Duration,

    /// Period of the registry fetch loop
    #[serde(with = "humantime_serde")]
    pub registry_fetch_interval: Duration,

    /// How this process describes itself when registering
    pub instance: InstanceConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            registry: RegistryConfig::default(),
            register_self: true,
            fetch_registry: true,
            lease_renewal_interval: Duration::from_secs(30),
            lease_expiration_duration: Duration::from_secs(90),
            registry_fetch_interval: Duration::from_secs(30),
            instance: InstanceConfig::default(),
        }
    }
}

/// Registry backends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryConfig {
    /// In-memory registry seeded with fixed endpoints per service
    Static {
        #[serde(default, deserialize_with = "deserialize_static_services")]
        services: BTreeMap<String, Vec<String>>,
    },

    /// Eureka-compatible HTTP registry, e.g. `http://localhost:8761/eureka`
    Eureka {
        service_url: String,
        #[serde(default = "default_registry_timeout", with = "humantime_serde")]
        timeout: Duration,
    },
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig::Static {
            services: BTreeMap::new(),
        }
    }
}

impl RegistryConfig {
    /// Backend name for logs and health output
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryConfig::Static { .. } => "static",
            RegistryConfig::Eureka { .. } => "eureka",
        }
    }
}

/// A list given either as a YAML sequence or as one comma-separated string,
/// so `--discovery.registry.services.users=http://a:80,http://b:80` works
#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    Joined(String),
    List(Vec<String>),
}

impl StringOrList {
    fn into_vec(self) -> Vec<String> {
        match self {
            StringOrList::Joined(joined) => joined
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect(),
            StringOrList::List(items) => items,
        }
    }
}

fn deserialize_static_services<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, StringOrList>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(service_id, urls)| (service_id, urls.into_vec()))
        .collect())
}

fn deserialize_optional_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<StringOrList>::deserialize(deserializer)?.map(StringOrList::into_vec))
}

/// Render a scalar leaf as text, so `version: 1.0` or `--service_id=42`
/// land in string fields unchanged
fn scalar_to_string<E: serde::de::Error>(value: Value) -> Result<String, E> {
    match value {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        other => Err(E::custom(format!("expected a string, found {}", other))),
    }
}

fn deserialize_optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        value => scalar_to_string(value).map(Some),
    }
}

fn deserialize_text_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    BTreeMap::<String, Value>::deserialize(deserializer)?
        .into_iter()
        .map(|(key, value)| Ok((key, scalar_to_string(value)?)))
        .collect()
}

fn default_registry_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Self-description used for registration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InstanceConfig {
    /// Explicit instance id; defaults to `{host}:{application}:{port}`
    #[serde(deserialize_with = "deserialize_optional_text")]
    pub instance_id: Option<String>,

    /// Advertised host name; defaults to `$HOSTNAME` or `localhost`
    #[serde(deserialize_with = "deserialize_optional_text")]
    pub hostname: Option<String>,

    /// Advertised IP address
    #[serde(deserialize_with = "deserialize_optional_text")]
    pub ip_address: Option<String>,

    /// Advertise the IP address instead of the host name
    pub prefer_ip_address: bool,

    /// Metadata published with the registration
    #[serde(deserialize_with = "deserialize_text_map")]
    pub metadata: BTreeMap<String, String>,
}

/// Reverse proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Activates the reverse proxy capability
    pub enabled: bool,

    /// Common path prefix for every route, e.g. `/api`
    pub prefix: String,

    /// Remove `prefix` before forwarding
    pub strip_prefix: bool,

    /// Explicit routes keyed by route id
    pub routes: BTreeMap<String, RouteDefinition>,

    /// Discovered services that get no default route (`*` wildcards allowed)
    pub ignored_services: Vec<String>,

    /// Request paths that are never proxied
    pub ignored_patterns: Vec<String>,

    /// Headers not passed between client and upstream
    pub sensitive_headers: Vec<String>,

    /// Add `X-Forwarded-*` headers to upstream requests
    pub add_proxy_headers: bool,

    /// Pass the client's `Host` header through unchanged
    pub add_host_header: bool,

    /// Instance selection strategy
    pub load_balancer: BalancerKind,

    /// Upstream connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Upstream response timeout
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: String::new(),
            strip_prefix: true,
            routes: BTreeMap::new(),
            ignored_services: Vec::new(),
            ignored_patterns: Vec::new(),
            sensitive_headers: default_sensitive_headers(),
            add_proxy_headers: true,
            add_host_header: false,
            load_balancer: BalancerKind::RoundRobin,
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(10),
        }
    }
}

fn default_sensitive_headers() -> Vec<String> {
    vec![
        "cookie".to_string(),
        "set-cookie".to_string(),
        "authorization".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

/// One explicitly configured route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDefinition {
    /// Path pattern: `/users/**`, `/users/*` or an exact path
    pub path: String,

    /// Target service; defaults to the route id when `url` is not set
    #[serde(default, deserialize_with = "deserialize_optional_text")]
    pub service_id: Option<String>,

    /// Fixed upstream URL instead of a discovered service
    #[serde(default, deserialize_with = "deserialize_optional_text")]
    pub url: Option<String>,

    /// Remove the literal part of `path` before forwarding
    #[serde(default = "default_true")]
    pub strip_prefix: bool,

    /// Replaces `proxy.sensitive_headers` for this route
    #[serde(default, deserialize_with = "deserialize_optional_list")]
    pub sensitive_headers: Option<Vec<String>>,
}

/// Instance selection strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalancerKind {
    #[default]
    RoundRobin,
    Random,
}

/// Static resources configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticResourcesConfig {
    pub enabled: bool,
    pub directory: PathBuf,
}

impl Default for StaticResourcesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from("static"),
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder and expose `/actuator/prometheus`
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Parse an `http(s)://host[:port]` endpoint
pub fn parse_endpoint_url(raw: &str) -> CenterResult<Url> {
    let url = Url::parse(raw).map_err(|e| config_error!("invalid URL '{}': {}", raw, e))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(config_error!("URL '{}' must use http or https", raw));
    }
    if url.host_str().is_none() {
        return Err(config_error!("URL '{}' has no host", raw));
    }
    Ok(url)
}

/// One `--key=value` command-line override
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    pub key: String,
    pub value: String,
}

/// Builds a [`CenterConfig`] from layered sources
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    env: HashMap<String, String>,
    args: Vec<String>,
}

impl ConfigLoader {
    /// Loader with no environment and no arguments (defaults only)
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from the process environment
    pub fn with_process_env(self) -> Self {
        self.with_env(std::env::vars())
    }

    /// Read overrides from the given variables
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    /// Raw process arguments (without the program name)
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Merge every layer, deserialize and validate
    pub fn load(&self) -> CenterResult<CenterConfig> {
        let overrides = parse_overrides(&self.args)?;

        let mut tree = serde_json::to_value(CenterConfig::default())?;

        let file = overrides
            .iter()
            .rev()
            .find(|o| o.key == CONFIG_PATH_KEY)
            .map(|o| PathBuf::from(&o.value))
            .or_else(|| self.env.get(CONFIG_PATH_ENV).map(PathBuf::from));

        if let Some(path) = file {
            let layer = read_config_file(&path)?;
            merge_values(&mut tree, layer);
            debug!(path = %path.display(), "Merged configuration file");
        }

        for (var, key) in ENV_OVERRIDES {
            if let Some(value) = self.env.get(*var) {
                apply_override(&mut tree, key, value)?;
            }
        }

        for o in overrides.iter().filter(|o| o.key != CONFIG_PATH_KEY) {
            apply_override(&mut tree, &o.key, &o.value)?;
        }

        let config: CenterConfig = serde_json::from_value(tree)
            .map_err(|e| config_error!("Invalid configuration value: {}", e))?;

        config.validate()?;
        Ok(config)
    }
}

/// Parse `--key=value` and `--flag` arguments; other arguments are ignored
pub fn parse_overrides(args: &[String]) -> CenterResult<Vec<Override>> {
    let mut overrides = Vec::new();

    for arg in args {
        let Some(body) = arg.strip_prefix("--") else {
            debug!(argument = %arg, "Ignoring non-option argument");
            continue;
        };
        if body.is_empty() {
            continue;
        }

        let (key, value) = match body.split_once('=') {
            Some((key, value)) => (key.trim(), value),
            None => (body.trim(), "true"),
        };

        if key.is_empty() || key.split('.').any(str::is_empty) {
            return Err(config_error!("Invalid argument '{}': malformed key", arg));
        }

        overrides.push(Override {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    Ok(overrides)
}

fn read_config_file(path: &Path) -> CenterResult<Value> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| config_error!("Failed to read config file {}: {}", path.display(), e))?;

    let layer: Value = serde_yaml::from_str(&content)
        .map_err(|e| config_error!("Failed to parse config file {}: {}", path.display(), e))?;

    match layer {
        Value::Null => Ok(Value::Object(Map::new())),
        Value::Object(_) => Ok(layer),
        _ => Err(config_error!(
            "Config file {} must contain a mapping at the top level",
            path.display()
        )),
    }
}

/// Deep-merge `layer` into `base`; mappings merge, everything else replaces
fn merge_values(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base_map), Value::Object(layer_map)) => {
            for (key, value) in layer_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

/// Set a dotted key in the tree, typing the raw value after what it replaces
fn apply_override(tree: &mut Value, key: &str, raw: &str) -> CenterResult<()> {
    let segments: Vec<&str> = key.split('.').collect();
    let mut node = tree;

    for (index, segment) in segments.iter().enumerate() {
        if node.is_null() {
            *node = Value::Object(Map::new());
        }
        let map = node.as_object_mut().ok_or_else(|| {
            config_error!(
                "Cannot override '{}': '{}' is not a section",
                key,
                segments[..index].join(".")
            )
        })?;

        let name = resolve_segment(map, segment);

        if index == segments.len() - 1 {
            let value = typed_value(map.get(&name), raw);
            map.insert(name, value);
            return Ok(());
        }

        node = map
            .entry(name)
            .or_insert_with(|| Value::Object(Map::new()));
    }

    Ok(())
}

/// `lease-renewal-interval` addresses `lease_renewal_interval` when that exists
fn resolve_segment(map: &Map<String, Value>, segment: &str) -> String {
    if map.contains_key(segment) {
        return segment.to_string();
    }
    let snake = segment.replace('-', "_");
    if map.contains_key(&snake) {
        snake
    } else {
        segment.to_string()
    }
}

fn typed_value(existing: Option<&Value>, raw: &str) -> Value {
    match existing {
        Some(Value::String(_)) => Value::String(raw.to_string()),
        Some(Value::Array(_)) => Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| Value::String(item.to_string()))
                .collect(),
        ),
        _ => parse_scalar(raw),
    }
}

fn parse_scalar(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::String(String::new());
    }
    match serde_yaml::from_str::<Value>(raw) {
        Ok(value @ (Value::Bool(_) | Value::Number(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}
