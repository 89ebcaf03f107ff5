//! HTTP endpoint for the registry.
//!
//! Thin axum adapter over [`RegistryStore`]: every handler maps one request
//! onto one store call. Request and response bodies are camelCase JSON.
//!
//! The store's register never fails, but the endpoint refuses a payload
//! whose `serviceName`, `instanceId` or `address` is empty with
//! `400 Bad Request` and leaves the store untouched. Such a record could
//! never be looked up or forwarded to.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use windmesh_common::{InstanceKey, MeshError, RegistrationPayload, Result, ServiceInstance};

use crate::health_sweeper::{HealthSweeper, SweeperConfig};
use crate::store::RegistryStore;

/// Builds the registry routes over a shared store.
///
/// - `GET /health` liveness
/// - `POST /register` upsert, 201 (400 when a required field is empty)
/// - `POST /heartbeat` refresh, 200 or 404 for an unknown instance
/// - `POST /deregister` remove, always 200
/// - `GET /services/:service_name` addresses, always 200 with a JSON array
/// - `GET /registry/view` full snapshot
pub fn router(store: Arc<RegistryStore>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/register", post(register))
        .route("/heartbeat", post(heartbeat))
        .route("/deregister", post(deregister))
        .route("/services/:service_name", get(list_services))
        .route("/registry/view", get(view_registry))
        .layer(CorsLayer::permissive())
        .with_state(store)
}

/// Registry process: HTTP endpoint plus the health sweeper.
pub struct RegistryServer {
    store: Arc<RegistryStore>,
    sweeper_config: SweeperConfig,
}

impl RegistryServer {
    pub fn new(sweeper_config: SweeperConfig) -> Self {
        Self::with_store(Arc::new(RegistryStore::new()), sweeper_config)
    }

    /// Serves an existing store, e.g. one shared with an in-process gateway.
    pub fn with_store(store: Arc<RegistryStore>, sweeper_config: SweeperConfig) -> Self {
        Self {
            store,
            sweeper_config,
        }
    }

    pub fn store(&self) -> Arc<RegistryStore> {
        Arc::clone(&self.store)
    }

    /// Runs until the process is killed.
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        self.run_until(addr, std::future::pending()).await
    }

    /// Binds `addr` and runs until `shutdown` resolves.
    pub async fn run_until<F>(self, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MeshError::Transport(format!("Failed to bind to {}: {}", addr, e)))?;
        self.serve(listener, shutdown).await
    }

    /// Serves on an already-bound listener.
    ///
    /// The sweeper starts with the server and is cancelled once the server
    /// has stopped accepting requests.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener
            .local_addr()
            .map_err(|e| MeshError::Transport(format!("Failed to get local addr: {}", e)))?;

        let sweeper = HealthSweeper::new(Arc::clone(&self.store), self.sweeper_config).spawn();
        let app = router(self.store);

        info!("Registry listening on {}", local_addr);

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| MeshError::Transport(format!("Server error: {}", e)));

        sweeper.shutdown();
        info!("Registry stopped");
        result
    }
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn register(
    State(store): State<Arc<RegistryStore>>,
    Json(payload): Json<RegistrationPayload>,
) -> Response {
    if payload.service_name.is_empty() || payload.instance_id.is_empty() || payload.address.is_empty() {
        warn!(op = "register", ?payload, "Rejected registration with empty fields");
        return (
            StatusCode::BAD_REQUEST,
            "serviceName, instanceId and address must be non-empty",
        )
            .into_response();
    }

    store.register(payload);
    (StatusCode::CREATED, "Registered").into_response()
}

async fn heartbeat(State(store): State<Arc<RegistryStore>>, Json(key): Json<InstanceKey>) -> Response {
    if store.heartbeat(&key.service_name, &key.instance_id) {
        (StatusCode::OK, "Heartbeat received").into_response()
    } else {
        warn!(
            op = "heartbeat",
            service = %key.service_name,
            instance = %key.instance_id,
            "Heartbeat for unknown instance"
        );
        (
            StatusCode::NOT_FOUND,
            "Instance not found; register again",
        )
            .into_response()
    }
}

async fn deregister(
    State(store): State<Arc<RegistryStore>>,
    Json(key): Json<InstanceKey>,
) -> impl IntoResponse {
    store.deregister(&key.service_name, &key.instance_id);
    (StatusCode::OK, "Deregistered")
}

async fn list_services(
    State(store): State<Arc<RegistryStore>>,
    Path(service_name): Path<String>,
) -> Json<Vec<String>> {
    Json(store.list_addresses(&service_name))
}

async fn view_registry(State(store): State<Arc<RegistryStore>>) -> Json<BTreeMap<String, Vec<ServiceInstance>>> {
    Json(store.dump())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use windmesh_common::JsonHttpClient;

    async fn start_registry() -> (Arc<RegistryStore>, String) {
        let store = Arc::new(RegistryStore::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(Arc::clone(&store));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (store, format!("http://{}", addr))
    }

    fn client() -> JsonHttpClient {
        JsonHttpClient::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = health_check().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_register_then_list() {
        let (store, base) = start_registry().await;
        let payload = RegistrationPayload::new("svc-a", "id-1", "10.0.0.5:8080");

        let response = client()
            .post_json(&format!("{}/register", base), &payload)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(store.instance_count(), 1);

        let response = client().get(&format!("{}/services/svc-a", base)).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        let addresses: Vec<String> = response.json().unwrap();
        assert_eq!(addresses, vec!["10.0.0.5:8080"]);
    }

    #[tokio::test]
    async fn test_list_unknown_service_is_empty_array() {
        let (_store, base) = start_registry().await;

        let response = client().get(&format!("{}/services/nope", base)).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.text(), "[]");
    }

    #[tokio::test]
    async fn test_heartbeat_known_and_unknown() {
        let (store, base) = start_registry().await;
        store.register(RegistrationPayload::new("svc-a", "id-1", "host:1"));

        let known = InstanceKey::new("svc-a", "id-1");
        let response = client()
            .post_json(&format!("{}/heartbeat", base), &known)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);

        let unknown = InstanceKey::new("svc-a", "id-2");
        let response = client()
            .post_json(&format!("{}/heartbeat", base), &unknown)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(store.instance_count(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_accepts_full_payload() {
        let (store, base) = start_registry().await;
        let payload = RegistrationPayload::new("svc-a", "id-1", "host:1");
        store.register(payload.clone());

        let response = client()
            .post_json(&format!("{}/heartbeat", base), &payload)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_deregister_is_always_ok() {
        let (store, base) = start_registry().await;
        store.register(RegistrationPayload::new("svc-a", "id-1", "host:1"));
        let key = InstanceKey::new("svc-a", "id-1");

        for _ in 0..2 {
            let response = client()
                .post_json(&format!("{}/deregister", base), &key)
                .await
                .unwrap();
            assert_eq!(response.status, StatusCode::OK);
        }
        assert!(store.dump().is_empty());
    }

    #[tokio::test]
    async fn test_registry_view() {
        let (store, base) = start_registry().await;
        store.register(RegistrationPayload::new("svc-a", "id-1", "host:1"));
        store.register(RegistrationPayload::new("svc-b", "id-1", "host:2"));

        let response = client().get(&format!("{}/registry/view", base)).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        let view: BTreeMap<String, Vec<ServiceInstance>> = response.json().unwrap();
        assert_eq!(view.len(), 2);
        assert_eq!(view["svc-b"][0].address, "host:2");
    }

    #[tokio::test]
    async fn test_register_rejects_empty_fields() {
        let (store, base) = start_registry().await;
        let payload = RegistrationPayload::new("", "id-1", "host:1");

        let response = client()
            .post_json(&format!("{}/register", base), &payload)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(store.instance_count(), 0);
    }

    #[tokio::test]
    async fn test_register_rejects_malformed_body() {
        let (store, base) = start_registry().await;

        let response = client()
            .post_json(&format!("{}/register", base), &serde_json::json!({"serviceName": "svc"}))
            .await
            .unwrap();
        assert!(response.status.is_client_error());
        assert_eq!(store.instance_count(), 0);
    }

    #[tokio::test]
    async fn test_server_graceful_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let server = RegistryServer::new(SweeperConfig::default());
        let task = tokio::spawn(server.serve(listener, async {
            let _ = rx.await;
        }));

        let response = client().get(&format!("http://{}/health", addr)).await.unwrap();
        assert_eq!(response.text(), "OK");

        tx.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}
