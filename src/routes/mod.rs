//! Egress route management
//!
//! Routes are the proxies or gateways a request can leave through. The pool
//! scores each one from its recent outcomes, blacklists the unhealthy ones
//! and picks a route per dispatch.

mod pool;
mod provisioner;
mod route;

pub use pool::{pick_weighted, ProxyHealthPool};
pub use provisioner::{GatewayProvisioner, StaticProvisioner};
pub use route::{EndpointDescriptor, Route, RouteHandle, RouteSnapshot, LATENCY_WINDOW};
