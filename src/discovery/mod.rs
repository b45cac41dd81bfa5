pub mod agent;
pub mod client;
pub mod eureka;
pub mod registry;

pub use agent::{local_instance, DiscoveryAgent};
pub use client::{create_discovery_client, instance_from_url, DiscoveryClient, LeaseRenewal, StaticDiscovery};
pub use eureka::EurekaDiscovery;
pub use registry::{RegistryEvent, RegistryStats, ServiceRegistry};
