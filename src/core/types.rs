//! # Core Types
//!
//! Data structures shared by the discovery client, the route locator and the
//! proxy engine.
//!
//! - `Arc<ServiceInstance>` is what the registry hands out, so a request can
//!   hold on to the instance it picked while the registry refreshes
//! - `InstanceStatus` follows the registry vocabulary (`UP`, `DOWN`, ...)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Registration status of a service instance
///
/// Serialized in the upper-case form registries use on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    /// Ready to receive traffic
    Up,
    /// Registered but failing
    Down,
    /// Registered, still initializing
    Starting,
    /// Taken out of rotation by an operator
    OutOfService,
    /// Status not reported
    #[default]
    Unknown,
}

impl InstanceStatus {
    /// Wire representation (`UP`, `OUT_OF_SERVICE`, ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Up => "UP",
            InstanceStatus::Down => "DOWN",
            InstanceStatus::Starting => "STARTING",
            InstanceStatus::OutOfService => "OUT_OF_SERVICE",
            InstanceStatus::Unknown => "UNKNOWN",
        }
    }

    /// Lenient parse; anything unrecognized is `Unknown`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "UP" => InstanceStatus::Up,
            "DOWN" => InstanceStatus::Down,
            "STARTING" => InstanceStatus::Starting,
            "OUT_OF_SERVICE" => InstanceStatus::OutOfService,
            _ => InstanceStatus::Unknown,
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One running instance of a service, as known to the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Unique instance identifier within its service
    pub instance_id: String,

    /// Service id, always lower-case (`users`, `orders`)
    pub service_id: String,

    /// Host name or IP address to connect to
    pub host: String,

    /// Advertised IP address, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    /// Port to connect to
    pub port: u16,

    /// Whether the instance speaks HTTPS
    pub secure: bool,

    /// Registration status
    pub status: InstanceStatus,

    /// Free-form metadata published with the registration
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ServiceInstance {
    /// Create an `UP` instance
    pub fn new(
        instance_id: impl Into<String>,
        service_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            service_id: service_id.into().to_ascii_lowercase(),
            host: host.into(),
            ip_address: None,
            port,
            secure: false,
            status: InstanceStatus::Up,
            metadata: HashMap::new(),
        }
    }

    /// Builder-style status override
    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = status;
        self
    }

    /// Only `UP` instances receive traffic
    pub fn is_available(&self) -> bool {
        self.status == InstanceStatus::Up
    }

    /// Scheme for requests to this instance
    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }

    /// Base URL without trailing slash, e.g. `http://10.0.0.5:8080`
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme(), self.host, self.port)
    }
}
