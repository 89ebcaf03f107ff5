//! Byte-for-byte HTTP forwarding to a resolved backend.
//!
//! The outbound request reuses the caller's method, path, query string and
//! body unchanged. Headers travel in both directions except for the
//! hop-by-hop set, which only means something to a single connection.

use axum::body::Body;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderName};
use hyper::{Request, Response};
use std::time::Duration;
use tracing::debug;

use windmesh_common::http::{hyper_client, HyperClient};
use windmesh_common::{MeshError, Result};

/// Never copied from the caller to the backend or back.
pub const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    // HeaderName is always lowercase
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Copies every header except the hop-by-hop set, keeping every value of
/// multi-valued headers in order.
pub fn end_to_end_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            filtered.append(name.clone(), value.clone());
        }
    }
    filtered
}

#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Bound on one whole backend exchange, body included
    pub timeout: Duration,
    /// Largest caller body buffered for forwarding
    pub max_body_bytes: usize,
}

impl ForwarderConfig {
    pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_body_bytes: Self::DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Sends gateway requests on to backends.
#[derive(Clone)]
pub struct Forwarder {
    client: HyperClient,
    config: ForwarderConfig,
}

impl Forwarder {
    pub fn new(config: ForwarderConfig) -> Self {
        Self {
            client: hyper_client(),
            config,
        }
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    /// Forwards a caller's request to one backend instance.
    ///
    /// The method, path, query string and body are sent unchanged to
    /// `http://{address}{path}?{query}`. Hop-by-hop headers are dropped on
    /// the way out and on the way back; every other header, including
    /// repeated ones such as `set-cookie`, is kept in order.
    ///
    /// # Arguments
    ///
    /// * `address` - Backend `host:port`, as resolved from the registry
    /// * `request` - The caller's request, consumed
    ///
    /// # Returns
    ///
    /// The backend's status, headers and body, whatever the status code.
    ///
    /// # Errors
    ///
    /// - [`MeshError::PayloadTooLarge`] when the caller's body is larger than
    ///   [`ForwarderConfig::max_body_bytes`]
    /// - [`MeshError::InvalidRequest`] when the caller's body cannot be read
    /// - [`MeshError::Transport`] when the backend cannot be reached
    /// - [`MeshError::Timeout`] when the exchange outlasts
    ///   [`ForwarderConfig::timeout`]
    pub async fn forward(&self, address: &str, request: Request<Body>) -> Result<Response<Body>> {
        let (parts, body) = request.into_parts();
        let limit = self.config.max_body_bytes;
        let body = Limited::new(body, limit)
            .collect()
            .await
            .map_err(|e| {
                if e.is::<LengthLimitError>() {
                    MeshError::PayloadTooLarge(limit)
                } else {
                    MeshError::InvalidRequest(format!("Failed to read request body: {}", e))
                }
            })?
            .to_bytes();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("http://{}{}", address, path_and_query);

        let mut outbound = Request::builder()
            .method(parts.method.clone())
            .uri(&url)
            .body(Full::new(body))
            .map_err(|e| MeshError::Transport(format!("Invalid backend address {}: {}", address, e)))?;
        *outbound.headers_mut() = end_to_end_headers(&parts.headers);

        debug!(method = %parts.method, url = %url, "Forwarding request");

        let exchange = async {
            let response = self
                .client
                .request(outbound)
                .await
                .map_err(|e| MeshError::Transport(format!("HTTP request failed: {}", e)))?;

            let (parts, body) = response.into_parts();
            let body: Bytes = body
                .collect()
                .await
                .map_err(|e| MeshError::Transport(format!("Failed to read response: {}", e)))?
                .to_bytes();
            Ok::<_, MeshError>((parts, body))
        };

        let (backend, body) = tokio::time::timeout(self.config.timeout, exchange)
            .await
            .map_err(|_| MeshError::Timeout(self.config.timeout.as_millis() as u64))??;

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = backend.status;
        *response.headers_mut() = end_to_end_headers(&backend.headers);
        Ok(response)
    }
}
