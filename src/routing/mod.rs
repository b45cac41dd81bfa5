pub mod router;

pub use router::{
    wildcard_match, PathPattern, ProxyRoute, RouteDescription, RouteLocator, RouteMatch, RouteTable,
    RouteTarget,
};
