//! # Center Application
//!
//! Owns the startup sequence. [`CenterApplication::start`] activates the
//! two capabilities in a fixed order and returns a [`RunningCenter`]:
//!
//! 1. install the metrics recorder
//! 2. build the discovery client and registry, fetch once
//! 3. build the route locator and proxy engine
//! 4. bind the listener
//! 5. register this instance
//! 6. spawn background loops and the server
//!
//! Registry problems in steps 2 and 5 degrade the center instead of
//! failing it. Configuration and bind errors are fatal.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::config::{Capabilities, CenterConfig};
use crate::core::error::{CenterError, CenterResult};
use crate::discovery::{create_discovery_client, local_instance, DiscoveryAgent, ServiceRegistry};
use crate::gateway::lifecycle::{Lifecycle, LifecycleState};
use crate::gateway::server::{build_app, ServerState};
use crate::observability::install_metrics;
use crate::proxy::ProxyEngine;
use crate::routing::RouteLocator;

/// A configured, not yet started center
pub struct CenterApplication {
    config: Arc<CenterConfig>,
    lifecycle: Arc<Lifecycle>,
}

impl CenterApplication {
    /// Build the configuration context from process arguments
    pub fn from_args<I, S>(args: I) -> CenterResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_config(CenterConfig::from_args(args)?)
    }

    pub fn from_config(config: CenterConfig) -> CenterResult<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            lifecycle: Arc::new(Lifecycle::new()),
        })
    }

    pub fn config(&self) -> &CenterConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        self.config.capabilities()
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Activate the capabilities, bind and start serving
    pub async fn start(self) -> CenterResult<RunningCenter> {
        let config = self.config;
        let lifecycle = self.lifecycle;
        let capabilities = config.capabilities();

        let metrics = if config.metrics.enabled {
            Some(install_metrics()?)
        } else {
            None
        };

        let registry = if capabilities.discovery_client_enabled {
            let client = create_discovery_client(&config.discovery)?;
            let registry = Arc::new(ServiceRegistry::new(client));
            if config.discovery.fetch_registry {
                match registry.refresh().await {
                    Ok(count) => info!(instances = count, "Initial registry fetch complete"),
                    Err(e) => warn!(error = %e, "Initial registry fetch failed, starting without discovered services"),
                }
            }
            Some(registry)
        } else {
            info!("Discovery client disabled");
            None
        };

        let proxy = if capabilities.reverse_proxy_enabled {
            let locator = Arc::new(RouteLocator::new(&config)?);
            if let Some(registry) = &registry {
                locator.refresh(&registry.service_ids());
            }
            Some(Arc::new(ProxyEngine::new(&config, locator, registry.clone())?))
        } else {
            info!("Reverse proxy disabled");
            None
        };

        let ip: IpAddr = config
            .server
            .address
            .parse()
            .map_err(|e| CenterError::config(format!("Invalid server.address '{}': {}", config.server.address, e)))?;
        let bind_addr = SocketAddr::new(ip, config.server.port);
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| CenterError::Io {
            message: format!("Failed to bind {}: {}", bind_addr, e),
        })?;
        let local_addr = listener.local_addr()?;

        let agent = registry.as_ref().map(|registry| {
            Arc::new(DiscoveryAgent::new(
                &config,
                registry.clone(),
                local_instance(&config, local_addr.port()),
            ))
        });
        if let Some(agent) = &agent {
            agent.register().await;
        }

        lifecycle.transition(LifecycleState::NotStarted, LifecycleState::Started)?;

        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();
        if let (Some(proxy), Some(registry)) = (&proxy, &registry) {
            tasks.push(proxy.locator().watch_registry(registry.clone(), shutdown.clone()));
        }
        if let Some(agent) = &agent {
            tasks.extend(agent.spawn(shutdown.clone()));
        }

        let mut state = ServerState::new(config.clone(), lifecycle.clone());
        state.registry = registry;
        state.agent = agent.clone();
        state.proxy = proxy;
        state.metrics = metrics;

        let app = build_app(state);
        let server_token = shutdown.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async move { server_token.cancelled().await })
                .await
        });

        info!(
            address = %local_addr,
            application = %config.application.name,
            discovery = capabilities.discovery_client_enabled,
            proxy = capabilities.reverse_proxy_enabled,
            "Center started"
        );

        Ok(RunningCenter {
            local_addr,
            capabilities,
            lifecycle,
            shutdown,
            server,
            tasks,
            agent,
            shutdown_timeout: config.server.shutdown_timeout,
        })
    }
}

/// A started center
pub struct RunningCenter {
    local_addr: SocketAddr,
    capabilities: Capabilities,
    lifecycle: Arc<Lifecycle>,
    shutdown: CancellationToken,
    server: JoinHandle<std::io::Result<()>>,
    tasks: Vec<JoinHandle<()>>,
    agent: Option<Arc<DiscoveryAgent>>,
    shutdown_timeout: Duration,
}

impl RunningCenter {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Whether the registry holds a live registration for this process
    pub fn is_registered(&self) -> bool {
        self.agent.as_ref().map_or(false, |agent| agent.is_registered())
    }

    /// Token that stops the center when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until SIGINT/SIGTERM or the shutdown token fires, then stop
    pub async fn wait(self) -> CenterResult<()> {
        tokio::select! {
            _ = shutdown_signal() => info!("Shutdown signal received"),
            _ = self.shutdown.cancelled() => {}
        }
        self.shutdown().await
    }

    /// Stop loops, deregister, drain the server
    pub async fn shutdown(self) -> CenterResult<()> {
        self.shutdown.cancel();

        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        if let Some(agent) = &self.agent {
            agent.deregister().await;
        }

        let mut server = self.server;
        match tokio::time::timeout(self.shutdown_timeout, &mut server).await {
            Ok(Ok(Ok(()))) => info!("Server drained"),
            Ok(Ok(Err(e))) => error!(error = %e, "Server stopped with an error"),
            Ok(Err(e)) => error!(error = %e, "Server task failed"),
            Err(_) => {
                warn!(
                    timeout = ?self.shutdown_timeout,
                    "Server did not drain in time, aborting"
                );
                server.abort();
            }
        }

        self.lifecycle
            .transition(LifecycleState::Started, LifecycleState::Stopped)?;
        info!("Center stopped");
        Ok(())
    }
}

/// SIGINT, plus SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
