//! Service registry.
//!
//! Holds the live instances of every logical service in memory, evicts the
//! ones that stop heartbeating, and exposes both over HTTP.
//!
//! ```no_run
//! use windmesh_registry::{RegistryServer, SweeperConfig};
//!
//! # async fn demo() -> windmesh_common::Result<()> {
//! let server = RegistryServer::new(SweeperConfig::default());
//! server.run("0.0.0.0:7000".parse().unwrap()).await
//! # }
//! ```

pub mod health_sweeper;
pub mod http_server;
pub mod store;

pub use health_sweeper::{HealthSweeper, SweeperConfig, SweeperHandle};
pub use http_server::{router, RegistryServer};
pub use store::RegistryStore;
