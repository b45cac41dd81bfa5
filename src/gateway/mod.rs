pub mod application;
pub mod lifecycle;
pub mod server;

pub use application::{CenterApplication, RunningCenter};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use server::{build_app, ServerState};
