//! # cb-center binary
//!
//! Hands the process arguments to [`cb_center::bootstrap::run`]. Any error
//! is logged and the process exits with status 1; a clean shutdown exits 0.

use tracing::error;

use cb_center::bootstrap;
use cb_center::observability::init_fallback_logging;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if let Err(e) = bootstrap::run(args).await {
        // The subscriber is missing when the configuration itself failed
        init_fallback_logging();
        error!(error = %e, kind = e.error_type(), "❌ Center failed: {}", e);
        std::process::exit(1);
    }
}
