//! # Process Entrypoint
//!
//! [`run`] is what `main` calls: build the configuration context from the
//! process arguments, install logging, activate discovery and the proxy,
//! then serve until SIGINT/SIGTERM.
//!
//! The entrypoint is single-shot. Once [`start`] has been entered, every
//! later call in the same process fails with [`CenterError::AlreadyStarted`],
//! whether or not the first call succeeded.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use crate::core::error::{CenterError, CenterResult};
use crate::gateway::{CenterApplication, RunningCenter};
use crate::observability::init_logging;

static ENTERED: AtomicBool = AtomicBool::new(false);

/// Build the context and start serving; returns once the listener is bound
pub async fn start<I, S>(args: I) -> CenterResult<RunningCenter>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    if ENTERED.swap(true, Ordering::SeqCst) {
        return Err(CenterError::AlreadyStarted);
    }

    let application = CenterApplication::from_args(args)?;
    init_logging(&application.config().logging);

    let capabilities = application.capabilities();
    info!("🚀 Starting {}", application.config().application.name);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        discovery_client_enabled = capabilities.discovery_client_enabled,
        reverse_proxy_enabled = capabilities.reverse_proxy_enabled,
        "📋 Configuration context built"
    );

    let running = application.start().await?;
    info!("🌐 Center ready on {}", running.local_addr());
    Ok(running)
}

/// [`start`], then block until shutdown completes
pub async fn run<I, S>(args: I) -> CenterResult<()>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let running = start(args).await?;
    running.wait().await?;
    info!("✅ Center shutdown complete");
    Ok(())
}
