//! Windmesh Common Types
//!
//! Shared building blocks for the windmesh service mesh: the registry wire
//! types, the error type used across every crate, the gateway API key store,
//! and a small HTTP client used for registry traffic.
//!
//! # Components
//!
//! - [`instance`] - `ServiceInstance`, `RegistrationPayload` and `InstanceKey`
//! - [`error`] - `MeshError` and the crate-wide `Result` alias
//! - [`auth`] - pre-shared `X-API-Key` allow-list
//! - [`discovery`] - the `AddressSource` seam used by the resolver
//! - [`http`] - JSON-over-HTTP client with per-call timeouts
//!
//! # Example
//!
//! ```
//! use windmesh_common::RegistrationPayload;
//!
//! let payload = RegistrationPayload::with_generated_id("application-server", "10.0.0.5:8080");
//! assert!(payload.instance_id.starts_with("application-server-"));
//! assert_eq!(
//!     payload.health_check_url.as_deref(),
//!     Some("http://10.0.0.5:8080/health")
//! );
//! ```

pub mod auth;
pub mod discovery;
pub mod error;
pub mod http;
pub mod instance;

pub use auth::{ApiKeyStore, API_KEY_HEADER};
pub use discovery::AddressSource;
pub use error::{MeshError, Result};
pub use http::{HttpResponse, JsonHttpClient};
pub use instance::{InstanceKey, RegistrationPayload, ServiceInstance};
