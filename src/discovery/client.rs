//! # Discovery Client
//!
//! The contract every registry backend implements, plus the in-memory
//! static backend used for fixed deployments and tests.
//!
//! A backend does four things: register this process, renew its lease,
//! deregister it on shutdown and list every known instance. Caching and
//! change notification live in [`ServiceRegistry`](super::ServiceRegistry),
//! so backends stay stateless where the registry protocol allows it.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::config::{parse_endpoint_url, DiscoveryConfig, RegistryConfig};
use crate::core::error::{CenterError, CenterResult};
use crate::core::types::ServiceInstance;
use crate::discovery::eureka::EurekaDiscovery;

/// Outcome of a lease renewal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseRenewal {
    /// The registry accepted the heartbeat
    Renewed,
    /// The registry no longer knows the instance; it must register again
    UnknownInstance,
}

/// Registry backend contract
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// Backend name for logs and health output
    fn description(&self) -> &'static str;

    /// Register an instance with the registry
    async fn register(&self, instance: &ServiceInstance) -> CenterResult<()>;

    /// Send one heartbeat for a registered instance
    async fn renew(&self, instance: &ServiceInstance) -> CenterResult<LeaseRenewal>;

    /// Remove an instance from the registry
    async fn deregister(&self, instance: &ServiceInstance) -> CenterResult<()>;

    /// Every instance the registry currently knows, all services included
    async fn fetch_instances(&self) -> CenterResult<Vec<ServiceInstance>>;
}

/// Build the backend selected by `discovery.registry`
pub fn create_discovery_client(config: &DiscoveryConfig) -> CenterResult<Arc<dyn DiscoveryClient>> {
    match &config.registry {
        RegistryConfig::Static { services } => {
            let discovery = StaticDiscovery::from_services(services)?;
            info!(
                services = services.len(),
                "Using static service registry"
            );
            Ok(Arc::new(discovery))
        }
        RegistryConfig::Eureka {
            service_url,
            timeout,
        } => {
            let discovery = EurekaDiscovery::new(
                service_url,
                *timeout,
                config.lease_renewal_interval,
                config.lease_expiration_duration,
            )?;
            info!(service_url = %service_url, "Using Eureka service registry");
            Ok(Arc::new(discovery))
        }
    }
}

/// Turn `http(s)://host[:port]` into an `UP` instance of `service_id`
pub fn instance_from_url(service_id: &str, raw: &str) -> CenterResult<ServiceInstance> {
    let url = parse_endpoint_url(raw)?;
    let host = url
        .host_str()
        .ok_or_else(|| CenterError::config(format!("URL '{}' has no host", raw)))?
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| CenterError::config(format!("URL '{}' has no port", raw)))?;

    let mut instance = ServiceInstance::new(
        format!("{}:{}:{}", host, service_id.to_ascii_lowercase(), port),
        service_id,
        host,
        port,
    );
    instance.secure = url.scheme() == "https";
    Ok(instance)
}

/// In-memory registry seeded from configuration
///
/// Registration adds to the same table, so a center using the static
/// backend sees itself the way it would in a real registry.
pub struct StaticDiscovery {
    instances: DashMap<String, ServiceInstance>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
        }
    }

    /// Seed from `{service_id: [url, ...]}`
    pub fn from_services(services: &BTreeMap<String, Vec<String>>) -> CenterResult<Self> {
        let discovery = Self::new();
        for (service_id, urls) in services {
            for url in urls {
                discovery.add_instance(instance_from_url(service_id, url)?);
            }
        }
        Ok(discovery)
    }

    pub fn add_instance(&self, instance: ServiceInstance) {
        debug!(
            instance_id = %instance.instance_id,
            service_id = %instance.service_id,
            "Static instance added"
        );
        self.instances.insert(instance.instance_id.clone(), instance);
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl Default for StaticDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoveryClient for StaticDiscovery {
    fn description(&self) -> &'static str {
        "static"
    }

    async fn register(&self, instance: &ServiceInstance) -> CenterResult<()> {
        self.add_instance(instance.clone());
        Ok(())
    }

    async fn renew(&self, instance: &ServiceInstance) -> CenterResult<LeaseRenewal> {
        if self.instances.contains_key(&instance.instance_id) {
            Ok(LeaseRenewal::Renewed)
        } else {
            Ok(LeaseRenewal::UnknownInstance)
        }
    }

    async fn deregister(&self, instance: &ServiceInstance) -> CenterResult<()> {
        self.instances.remove(&instance.instance_id);
        Ok(())
    }

    async fn fetch_instances(&self) -> CenterResult<Vec<ServiceInstance>> {
        let mut instances: Vec<ServiceInstance> = self
            .instances
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        instances.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_from_url() {
        let instance = instance_from_url("Users", "https://10.0.0.7").unwrap();
        assert_eq!(instance.service_id, "users");
        assert_eq!(instance.port, 443);
        assert!(instance.secure);
        assert_eq!(instance.instance_id, "10.0.0.7:users:443");

        assert!(instance_from_url("users", "mailto:ops@example.com").is_err());
    }

    #[tokio::test]
    async fn test_static_register_renew_deregister() {
        let mut services = BTreeMap::new();
        services.insert("orders".to_string(), vec!["http://localhost:9001".to_string()]);
        let discovery = StaticDiscovery::from_services(&services).unwrap();
        assert_eq!(discovery.len(), 1);

        let me = ServiceInstance::new("host:cb-center:8080", "cb-center", "host", 8080);
        assert_eq!(discovery.renew(&me).await.unwrap(), LeaseRenewal::UnknownInstance);

        discovery.register(&me).await.unwrap();
        assert_eq!(discovery.renew(&me).await.unwrap(), LeaseRenewal::Renewed);
        assert_eq!(discovery.fetch_instances().await.unwrap().len(), 2);

        discovery.deregister(&me).await.unwrap();
        assert_eq!(discovery.fetch_instances().await.unwrap().len(), 1);
    }
}
