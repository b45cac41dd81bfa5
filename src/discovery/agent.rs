//! # Discovery Agent
//!
//! Keeps this process registered and the local registry cache fresh.
//!
//! Registration failures never stop the center: it keeps serving in
//! degraded mode and retries on every heartbeat tick until the registry
//! accepts it.

use metrics::counter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::CenterConfig;
use crate::core::types::ServiceInstance;
use crate::discovery::client::{DiscoveryClient, LeaseRenewal};
use crate::discovery::registry::ServiceRegistry;

/// Describe this process as a registry instance listening on `port`
pub fn local_instance(config: &CenterConfig, port: u16) -> ServiceInstance {
    let settings = &config.discovery.instance;
    let app = &config.application.name;

    let hostname = settings
        .hostname
        .clone()
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
        .unwrap_or_else(|| "localhost".to_string());

    let host = match (&settings.ip_address, settings.prefer_ip_address) {
        (Some(ip), true) => ip.clone(),
        _ => hostname,
    };

    let instance_id = settings
        .instance_id
        .clone()
        .unwrap_or_else(|| format!("{}:{}:{}", host, app, port));

    let mut instance = ServiceInstance::new(instance_id, app.as_str(), host, port);
    instance.ip_address = settings.ip_address.clone();
    instance.metadata = settings
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    instance
}

/// Registration, heartbeat and fetch loops for one process
pub struct DiscoveryAgent {
    client: Arc<dyn DiscoveryClient>,
    registry: Arc<ServiceRegistry>,
    local: ServiceInstance,
    register_self: bool,
    fetch_registry: bool,
    lease_renewal_interval: Duration,
    registry_fetch_interval: Duration,
    registered: AtomicBool,
}

impl DiscoveryAgent {
    pub fn new(config: &CenterConfig, registry: Arc<ServiceRegistry>, local: ServiceInstance) -> Self {
        Self {
            client: registry.client().clone(),
            registry,
            local,
            register_self: config.discovery.register_self,
            fetch_registry: config.discovery.fetch_registry,
            lease_renewal_interval: config.discovery.lease_renewal_interval,
            registry_fetch_interval: config.discovery.registry_fetch_interval,
            registered: AtomicBool::new(false),
        }
    }

    pub fn local_instance(&self) -> &ServiceInstance {
        &self.local
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Whether the registry currently holds a live registration
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Whether this process registers itself at all
    pub fn registers_self(&self) -> bool {
        self.register_self
    }

    /// Register; failure leaves the agent in degraded mode
    pub async fn register(&self) -> bool {
        if !self.register_self {
            return false;
        }

        match self.client.register(&self.local).await {
            Ok(()) => {
                self.registered.store(true, Ordering::SeqCst);
                counter!("center_discovery_registrations_total", "result" => "success").increment(1);
                info!(
                    instance_id = %self.local.instance_id,
                    backend = self.client.description(),
                    "Instance registered"
                );
                true
            }
            Err(e) => {
                self.registered.store(false, Ordering::SeqCst);
                counter!("center_discovery_registrations_total", "result" => "failure").increment(1);
                warn!(
                    instance_id = %self.local.instance_id,
                    error = %e,
                    "Registration failed, running in degraded mode"
                );
                false
            }
        }
    }

    /// One heartbeat round
    pub async fn heartbeat(&self) {
        if !self.register_self {
            return;
        }
        if !self.is_registered() {
            self.register().await;
            return;
        }

        match self.client.renew(&self.local).await {
            Ok(LeaseRenewal::Renewed) => {
                counter!("center_discovery_heartbeats_total", "result" => "renewed").increment(1);
                debug!(instance_id = %self.local.instance_id, "Lease renewed");
            }
            Ok(LeaseRenewal::UnknownInstance) => {
                counter!("center_discovery_heartbeats_total", "result" => "unknown").increment(1);
                warn!(
                    instance_id = %self.local.instance_id,
                    "Registry does not know this instance, registering again"
                );
                self.registered.store(false, Ordering::SeqCst);
                self.register().await;
            }
            Err(e) => {
                counter!("center_discovery_heartbeats_total", "result" => "failure").increment(1);
                warn!(instance_id = %self.local.instance_id, error = %e, "Heartbeat failed");
            }
        }
    }

    /// One registry fetch round
    pub async fn fetch(&self) {
        if !self.fetch_registry {
            return;
        }
        if let Err(e) = self.registry.refresh().await {
            counter!("center_discovery_fetch_failures_total").increment(1);
            warn!(error = %e, "Registry fetch failed, keeping cached instances");
        }
    }

    /// Remove the registration if one exists
    pub async fn deregister(&self) {
        if !self.registered.swap(false, Ordering::SeqCst) {
            return;
        }
        match self.client.deregister(&self.local).await {
            Ok(()) => info!(instance_id = %self.local.instance_id, "Instance deregistered"),
            Err(e) => warn!(instance_id = %self.local.instance_id, error = %e, "Deregistration failed"),
        }
    }

    /// Start the heartbeat and fetch loops; both stop when `shutdown` fires
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if self.register_self {
            let agent = self.clone();
            let token = shutdown.clone();
            handles.push(tokio::spawn(async move {
                run_every(agent.lease_renewal_interval, token, || agent.heartbeat()).await;
                debug!("Heartbeat loop stopped");
            }));
        }

        if self.fetch_registry {
            let agent = self.clone();
            handles.push(tokio::spawn(async move {
                run_every(agent.registry_fetch_interval, shutdown, || agent.fetch()).await;
                debug!("Registry fetch loop stopped");
            }));
        }

        handles
    }
}

/// Run `task` every `period`, skipping the immediate first tick
async fn run_every<F, Fut>(period: Duration, shutdown: CancellationToken, mut task: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => task().await,
        }
    }
}
