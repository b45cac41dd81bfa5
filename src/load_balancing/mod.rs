pub mod balancer;

pub use balancer::{create_load_balancer, LoadBalancer, RandomBalancer, RoundRobinBalancer};
