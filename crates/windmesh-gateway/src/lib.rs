//! Windmesh API gateway.
//!
//! Authenticates callers by pre-shared API key, routes on the first path
//! segment, resolves the target service round-robin, and forwards the
//! request untouched apart from hop-by-hop headers.

pub mod http_server;
pub mod proxy;
pub mod routes;

pub use http_server::{GatewayServer, GatewayState};
pub use proxy::{Forwarder, ForwarderConfig, HOP_BY_HOP_HEADERS};
pub use routes::{Route, RouteTable};
