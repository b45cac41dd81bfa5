//! # cb-center
//!
//! The Cibon edge center: one process that is both a service-discovery
//! client and a reverse proxy in front of the discovered services.
//!
//! ## Module map
//!
//! - [`bootstrap`]: the single-shot process entrypoint
//! - [`core`]: configuration context, error type, instance model
//! - [`discovery`]: registry clients, local registry cache, registration agent
//! - [`routing`]: route table built from configuration and discovery
//! - [`load_balancing`]: instance selection
//! - [`proxy`]: upstream forwarding and header rules
//! - [`gateway`]: startup ordering, lifecycle, the axum application
//! - [`observability`]: tracing subscriber and Prometheus metrics
//!
//! ## Embedding
//!
//! ```no_run
//! # async fn demo() -> cb_center::CenterResult<()> {
//! let app = cb_center::CenterApplication::from_args(["--server.port=0"])?;
//! let running = app.start().await?;
//! println!("listening on {}", running.local_addr());
//! running.shutdown().await
//! # }
//! ```

pub mod bootstrap;

/// Configuration, errors and shared data types
pub mod core;

/// Discovery clients and the local registry
pub mod discovery;

/// Startup sequence and HTTP server
pub mod gateway;

pub mod load_balancing;

pub mod observability;

/// Request forwarding
pub mod proxy;

/// Route table and path matching
pub mod routing;

pub use core::config::{Capabilities, CenterConfig, ConfigLoader};
pub use core::error::{CenterError, CenterResult};
pub use core::types::{InstanceStatus, ServiceInstance};
pub use gateway::{CenterApplication, LifecycleState, RunningCenter};
