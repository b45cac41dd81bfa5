// Structured logging
pub mod logging;

// Prometheus metrics
pub mod metrics;

pub use logging::{init_fallback_logging, init_logging};
pub use metrics::{install_metrics, record_proxy_request};
