pub mod forwarder;
pub mod headers;

pub use forwarder::ProxyEngine;
pub use headers::{ForwardedInfo, X_REQUEST_ID};
