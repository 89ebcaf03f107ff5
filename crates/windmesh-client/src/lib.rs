//! Windmesh client side.
//!
//! - [`RegistrationClient`] keeps a backend registered and heartbeating
//! - [`ServiceResolver`] turns a logical service name into one address,
//!   round-robin over whatever an [`AddressSource`](windmesh_common::AddressSource) returns
//! - [`HttpAddressSource`] is the address source that asks a remote registry

pub mod registrar;
pub mod resolver;
pub mod sources;

pub use registrar::{HeartbeatConfig, RegistrationClient, RetryConfig};
pub use resolver::{select_address, ServiceResolver};
pub use sources::HttpAddressSource;
