//! # Load Balancer Module
//!
//! Picks one instance out of the available instances of a service.
//!
//! 1. **Round Robin**: a counter per service, so interleaved requests to
//!    different services do not skew each other's rotation
//! 2. **Random**: uniform choice
//!
//! Selection is synchronous; the proxy calls it on the request path with a
//! snapshot of the registry.

use dashmap::DashMap;
use metrics::counter;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::config::BalancerKind;
use crate::core::types::ServiceInstance;

/// Instance selection strategy
pub trait LoadBalancer: Send + Sync {
    /// Pick an instance of `service_id`; `None` when the slice is empty
    fn select(
        &self,
        service_id: &str,
        instances: &[Arc<ServiceInstance>],
    ) -> Option<Arc<ServiceInstance>>;

    /// Algorithm name for logs and metrics
    fn algorithm_name(&self) -> &'static str;
}

/// Build the balancer named in configuration
pub fn create_load_balancer(kind: BalancerKind) -> Arc<dyn LoadBalancer> {
    match kind {
        BalancerKind::RoundRobin => Arc::new(RoundRobinBalancer::new()),
        BalancerKind::Random => Arc::new(RandomBalancer),
    }
}

/// Round-robin with one atomic counter per service
pub struct RoundRobinBalancer {
    counters: DashMap<String, AtomicUsize>,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    fn next_index(&self, service_id: &str, len: usize) -> usize {
        if let Some(counter) = self.counters.get(service_id) {
            return counter.fetch_add(1, Ordering::Relaxed) % len;
        }
        let counter = self
            .counters
            .entry(service_id.to_string())
            .or_insert_with(|| AtomicUsize::new(0));
        counter.fetch_add(1, Ordering::Relaxed) % len
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn select(
        &self,
        service_id: &str,
        instances: &[Arc<ServiceInstance>],
    ) -> Option<Arc<ServiceInstance>> {
        if instances.is_empty() {
            counter!("center_load_balancer_failed_selections_total", "service" => service_id.to_string())
                .increment(1);
            return None;
        }
        let index = self.next_index(service_id, instances.len());
        instances.get(index).cloned()
    }

    fn algorithm_name(&self) -> &'static str {
        "round_robin"
    }
}

/// Uniform random choice
pub struct RandomBalancer;

impl LoadBalancer for RandomBalancer {
    fn select(
        &self,
        service_id: &str,
        instances: &[Arc<ServiceInstance>],
    ) -> Option<Arc<ServiceInstance>> {
        if instances.is_empty() {
            counter!("center_load_balancer_failed_selections_total", "service" => service_id.to_string())
                .increment(1);
            return None;
        }
        let index = rand::thread_rng().gen_range(0..instances.len());
        instances.get(index).cloned()
    }

    fn algorithm_name(&self) -> &'static str {
        "random"
    }
}
