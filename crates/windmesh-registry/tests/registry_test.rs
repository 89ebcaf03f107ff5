use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use windmesh_common::{InstanceKey, JsonHttpClient, RegistrationPayload};
use windmesh_registry::{RegistryServer, RegistryStore, SweeperConfig};

fn fast_sweeper() -> SweeperConfig {
    SweeperConfig {
        initial_delay: Duration::from_millis(20),
        interval: Duration::from_millis(25),
        heartbeat_timeout: Duration::from_millis(150),
    }
}

async fn start(config: SweeperConfig) -> (Arc<RegistryStore>, String, tokio::sync::oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = RegistryServer::new(config);
    let store = server.store();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(server.serve(listener, async {
        let _ = rx.await;
    }));

    (store, format!("http://{}", addr), tx)
}

#[tokio::test]
async fn test_silent_instance_is_evicted() {
    let (store, base, _shutdown) = start(fast_sweeper()).await;
    let client = JsonHttpClient::new(Duration::from_secs(5));

    let payload = RegistrationPayload::new("svc-a", "id-1", "10.0.0.5:8080");
    let response = client.post_json(&format!("{}/register", base), &payload).await.unwrap();
    assert_eq!(response.status.as_u16(), 201);

    tokio::time::sleep(Duration::from_millis(500)).await;

    let response = client.get(&format!("{}/services/svc-a", base)).await.unwrap();
    let addresses: Vec<String> = response.json().unwrap();
    assert!(addresses.is_empty());
    assert!(store.dump().is_empty());

    // A heartbeat after eviction is rejected so the instance knows to re-register
    let response = client
        .post_json(&format!("{}/heartbeat", base), &InstanceKey::new("svc-a", "id-1"))
        .await
        .unwrap();
    assert_eq!(response.status.as_u16(), 404);
}

#[tokio::test]
async fn test_heartbeating_instance_survives_sweeps() {
    let (_store, base, _shutdown) = start(fast_sweeper()).await;
    let client = JsonHttpClient::new(Duration::from_secs(5));

    let payload = RegistrationPayload::new("svc-a", "id-1", "10.0.0.5:8080");
    client.post_json(&format!("{}/register", base), &payload).await.unwrap();

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(40)).await;
        let response = client
            .post_json(&format!("{}/heartbeat", base), &payload.key())
            .await
            .unwrap();
        assert_eq!(response.status.as_u16(), 200);
    }

    let response = client.get(&format!("{}/services/svc-a", base)).await.unwrap();
    let addresses: Vec<String> = response.json().unwrap();
    assert_eq!(addresses, vec!["10.0.0.5:8080"]);
}

#[tokio::test]
async fn test_register_after_eviction_is_fresh() {
    let (store, base, _shutdown) = start(fast_sweeper()).await;
    let client = JsonHttpClient::new(Duration::from_secs(5));
    let payload = RegistrationPayload::new("svc-a", "id-1", "10.0.0.5:8080");

    client.post_json(&format!("{}/register", base), &payload).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(store.instance_count(), 0);

    let response = client.post_json(&format!("{}/register", base), &payload).await.unwrap();
    assert_eq!(response.status.as_u16(), 201);
    assert_eq!(store.list_addresses("svc-a"), vec!["10.0.0.5:8080"]);
}
