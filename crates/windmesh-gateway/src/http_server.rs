//! HTTP Server for the Gateway
//!
//! Every request passes through the same pipeline, and each stage can end it:
//!
//! 1. authenticate the `X-API-Key` header (401)
//! 2. map the first path segment to a service name (404)
//! 3. resolve the service to one instance address (503)
//! 4. forward to that address and relay the answer (502 if unreachable)
//!
//! `GET /discovery/:service_name` stops after resolving and returns the
//! address itself as plain text, or 404.

use axum::{
    extract::{rejection::PathRejection, Path, Request, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use windmesh_client::ServiceResolver;
use windmesh_common::{AddressSource, ApiKeyStore, MeshError, Result, API_KEY_HEADER};

use crate::proxy::{Forwarder, ForwarderConfig};
use crate::routes::RouteTable;

/// Everything a request handler needs, shared by all requests.
pub struct GatewayState<S> {
    pub api_keys: ApiKeyStore,
    pub routes: RouteTable,
    pub resolver: ServiceResolver<S>,
    pub forwarder: Forwarder,
}

impl<S> GatewayState<S> {
    fn is_authorized(&self, headers: &HeaderMap) -> bool {
        let provided = headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok());
        self.api_keys.is_valid(provided)
    }
}

/// API gateway in front of every registered backend.
pub struct GatewayServer<S> {
    state: Arc<GatewayState<S>>,
}

impl<S: AddressSource + 'static> GatewayServer<S> {
    pub fn new(
        api_keys: ApiKeyStore,
        routes: RouteTable,
        source: S,
        forwarder_config: ForwarderConfig,
    ) -> Self {
        Self {
            state: Arc::new(GatewayState {
                api_keys,
                routes,
                resolver: ServiceResolver::new(source),
                forwarder: Forwarder::new(forwarder_config),
            }),
        }
    }

    pub fn state(&self) -> Arc<GatewayState<S>> {
        Arc::clone(&self.state)
    }

    /// Builds the axum app. Everything except `GET /discovery/...` falls
    /// through to the proxy pipeline, whatever the method.
    pub fn router(&self) -> Router {
        Router::new()
            .route(
                "/discovery/:service_name",
                get(discover::<S>).fallback(proxy_request::<S>),
            )
            .fallback(proxy_request::<S>)
            .with_state(Arc::clone(&self.state))
    }

    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        self.run_until(addr, std::future::pending()).await
    }

    pub async fn run_until<F>(self, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MeshError::Transport(format!("Failed to bind to {}: {}", addr, e)))?;
        self.serve(listener, shutdown).await
    }

    /// Serves on an already-bound listener until `shutdown` resolves.
    /// In-flight forwards run to completion or their own timeout.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener
            .local_addr()
            .map_err(|e| MeshError::Transport(format!("Failed to get local addr: {}", e)))?;

        for (prefix, service) in self.state.routes.iter() {
            info!("Route /{} -> {}", prefix, service);
        }
        info!("Gateway listening on {} ({})", local_addr, self.state.api_keys);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| MeshError::Transport(format!("Server error: {}", e)))?;

        info!("Gateway stopped");
        Ok(())
    }
}

/// Returns one resolved address as plain text.
///
/// The path rejection is only surfaced after the key check, so an
/// unauthenticated caller always gets 401.
async fn discover<S: AddressSource + 'static>(
    State(state): State<Arc<GatewayState<S>>>,
    headers: HeaderMap,
    service_name: std::result::Result<Path<String>, PathRejection>,
) -> Response {
    if !state.is_authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    let Path(service_name) = match service_name {
        Ok(path) => path,
        Err(rejection) => return rejection.into_response(),
    };

    match state.resolver.resolve(&service_name).await {
        Ok(address) => (StatusCode::OK, address).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "Service not found").into_response(),
    }
}

async fn proxy_request<S: AddressSource + 'static>(
    State(state): State<Arc<GatewayState<S>>>,
    request: Request,
) -> Response {
    if !state.is_authorized(request.headers()) {
        warn!(method = %request.method(), path = %request.uri().path(), "Rejected request with invalid API key");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    let path = request.uri().path().to_string();
    let Some(service_name) = state.routes.service_for_path(&path) else {
        debug!(path = %path, "No route");
        return (StatusCode::NOT_FOUND, format!("Not Found: no service route for '{}'", path))
            .into_response();
    };

    let address = match state.resolver.resolve(service_name).await {
        Ok(address) => address,
        Err(_) => {
            warn!(service = %service_name, path = %path, "No instance available");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Service Unavailable: {}", service_name),
            )
                .into_response();
        }
    };

    debug!(service = %service_name, address = %address, path = %path, "Routing request");

    match state.forwarder.forward(&address, request).await {
        Ok(response) => response,
        Err(MeshError::PayloadTooLarge(limit)) => (
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Payload Too Large: body exceeds {} bytes", limit),
        )
            .into_response(),
        Err(MeshError::InvalidRequest(e)) => (StatusCode::BAD_REQUEST, e).into_response(),
        Err(e) => {
            warn!(
                op = "forward",
                service = %service_name,
                address = %address,
                path = %path,
                error = %e,
                "Backend call failed"
            );
            (StatusCode::BAD_GATEWAY, format!("Bad Gateway: {}", e)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts lookups so tests can prove a stage was never reached.
    #[derive(Default)]
    struct CountingSource {
        addresses: Vec<String>,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl AddressSource for CountingSource {
        async fn list_addresses(&self, _service_name: &str) -> Result<Vec<String>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.addresses.clone())
        }
    }

    fn gateway(addresses: &[&str]) -> GatewayServer<CountingSource> {
        GatewayServer::new(
            ApiKeyStore::new(["valid-key"]),
            RouteTable::new(["x=svc-a".parse().unwrap()]),
            CountingSource {
                addresses: addresses.iter().map(|a| a.to_string()).collect(),
                ..Default::default()
            },
            ForwarderConfig::default(),
        )
    }

    async fn call(server: &GatewayServer<CountingSource>, request: Request) -> (StatusCode, String) {
        let state = server.state();
        let response = proxy_request(State(state), request).await;
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    fn request(path: &str, key: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri(path);
        if let Some(key) = key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_key_is_unauthorized() {
        let server = gateway(&["127.0.0.1:1"]);
        let (status, body) = call(&server, request("/x/ping", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "Unauthorized");
        assert_eq!(server.state().resolver.source().lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wrong_key_is_unauthorized() {
        let server = gateway(&["127.0.0.1:1"]);
        let (status, _) = call(&server, request("/x/ping", Some("nope"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(server.state().resolver.source().lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_prefix_is_not_found() {
        let server = gateway(&["127.0.0.1:1"]);
        let (status, _) = call(&server, request("/y/ping", Some("valid-key"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&server, request("/", Some("valid-key"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(server.state().resolver.source().lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_instances_is_service_unavailable() {
        let server = gateway(&[]);
        let (status, body) = call(&server, request("/x/ping", Some("valid-key"))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "Service Unavailable: svc-a");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_bad_gateway() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let server = gateway(&[&addr]);
        let (status, body) = call(&server, request("/x/ping", Some("valid-key"))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body.starts_with("Bad Gateway: "));
    }

    #[tokio::test]
    async fn test_oversized_body_is_payload_too_large() {
        let server = GatewayServer::new(
            ApiKeyStore::new(["valid-key"]),
            RouteTable::new(["x=svc-a".parse().unwrap()]),
            CountingSource {
                addresses: vec!["127.0.0.1:1".to_string()],
                ..Default::default()
            },
            ForwarderConfig {
                max_body_bytes: 8,
                ..Default::default()
            },
        );
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/x/upload")
            .header(API_KEY_HEADER, "valid-key")
            .body(Body::from("far more than eight bytes"))
            .unwrap();

        let (status, body) = call(&server, request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body.contains("8 bytes"));
    }

    #[tokio::test]
    async fn test_discover_endpoint() {
        let server = gateway(&["10.0.0.5:8080"]);
        let state = server.state();

        let mut headers = HeaderMap::new();
        let response = discover(State(Arc::clone(&state)), headers.clone(), Ok(Path("svc-a".to_string()))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        headers.insert("x-api-key", "valid-key".parse().unwrap());
        let response = discover(State(Arc::clone(&state)), headers, Ok(Path("svc-a".to_string()))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"10.0.0.5:8080");
    }

    #[tokio::test]
    async fn test_discover_unknown_is_not_found() {
        let server = gateway(&[]);
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "valid-key".parse().unwrap());

        let response = discover(State(server.state()), headers, Ok(Path("svc-a".to_string()))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
