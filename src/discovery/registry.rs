//! # Service Registry
//!
//! Local cache of the instances known to the registry backend. The proxy
//! reads it on every request, the fetch loop replaces it wholesale.
//!
//! - `DashMap` keyed by lower-case service id, values are `Arc`ed so a
//!   request keeps the instance it picked while a refresh swaps the list
//! - `tokio::sync::broadcast` announces changes to the set of service ids,
//!   which is what default routes are built from

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::core::error::CenterResult;
use crate::core::types::ServiceInstance;
use crate::discovery::client::DiscoveryClient;

/// Change notifications published by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// The set of known service ids changed
    ServicesChanged { service_ids: Vec<String> },
}

/// Registry statistics
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_services: usize,
    pub total_instances: usize,
    pub available_instances: usize,
    pub last_refresh: Option<DateTime<Utc>>,
}

/// Cached view of the registry
pub struct ServiceRegistry {
    client: Arc<dyn DiscoveryClient>,
    services: DashMap<String, Vec<Arc<ServiceInstance>>>,
    change_sender: broadcast::Sender<RegistryEvent>,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
}

impl ServiceRegistry {
    pub fn new(client: Arc<dyn DiscoveryClient>) -> Self {
        let (change_sender, _) = broadcast::channel(64);

        Self {
            client,
            services: DashMap::new(),
            change_sender,
            last_refresh: RwLock::new(None),
        }
    }

    /// Backend this registry fetches from
    pub fn client(&self) -> &Arc<dyn DiscoveryClient> {
        &self.client
    }

    /// Fetch every instance from the backend and replace the cache
    pub async fn refresh(&self) -> CenterResult<usize> {
        let instances = self.client.fetch_instances().await?;
        let count = instances.len();
        self.replace_instances(instances);
        *self.last_refresh.write() = Some(Utc::now());

        debug!(instances = count, "Service registry refreshed");
        Ok(count)
    }

    /// Replace the cache; returns whether the set of service ids changed
    pub fn replace_instances(&self, instances: Vec<ServiceInstance>) -> bool {
        let previous: BTreeSet<String> = self.services.iter().map(|e| e.key().clone()).collect();

        let mut grouped: HashMap<String, Vec<Arc<ServiceInstance>>> = HashMap::new();
        for instance in instances {
            grouped
                .entry(instance.service_id.to_ascii_lowercase())
                .or_default()
                .push(Arc::new(instance));
        }
        let current: BTreeSet<String> = grouped.keys().cloned().collect();

        self.services.retain(|service_id, _| current.contains(service_id));
        for (service_id, list) in grouped {
            self.services.insert(service_id, list);
        }

        let changed = previous != current;
        if changed {
            let service_ids: Vec<String> = current.into_iter().collect();
            info!(services = ?service_ids, "Discovered services changed");
            // No subscribers is not an error
            let _ = self
                .change_sender
                .send(RegistryEvent::ServicesChanged { service_ids });
        }
        changed
    }

    /// Every cached instance of a service
    pub fn instances(&self, service_id: &str) -> Vec<Arc<ServiceInstance>> {
        self.services
            .get(&service_id.to_ascii_lowercase())
            .map(|instances| instances.clone())
            .unwrap_or_default()
    }

    /// Instances of a service that may receive traffic
    pub fn available_instances(&self, service_id: &str) -> Vec<Arc<ServiceInstance>> {
        self.instances(service_id)
            .into_iter()
            .filter(|instance| instance.is_available())
            .collect()
    }

    /// Sorted service ids
    pub fn service_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.change_sender.subscribe()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut total_instances = 0;
        let mut available_instances = 0;
        for entry in self.services.iter() {
            total_instances += entry.value().len();
            available_instances += entry.value().iter().filter(|i| i.is_available()).count();
        }

        RegistryStats {
            total_services: self.services.len(),
            total_instances,
            available_instances,
            last_refresh: *self.last_refresh.read(),
        }
    }
}
