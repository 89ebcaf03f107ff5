//! # Windmesh CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Start the registry
//! windmesh registry --bind 0.0.0.0:7000
//!
//! # Start the gateway with the default keys and routes
//! windmesh gateway --bind 0.0.0.0:8000 --registry http://localhost:7000
//!
//! # Custom keys and routes
//! windmesh gateway --api-key k1 --api-key k2 --route app=application-server
//!
//! # Keep a backend registered until Ctrl+C
//! windmesh announce --service application-server --address 10.0.0.5:8080
//!
//! # Print one address for a service
//! windmesh resolve application-server
//! ```

use anyhow::Result;
use argh::FromArgs;
use std::net::SocketAddr;
use std::time::Duration;

use windmesh_cli::{registry_url, shutdown_signal, validate_http_url, REGISTRY_URL_ENV};
use windmesh_client::{HttpAddressSource, RegistrationClient, ServiceResolver};
use windmesh_common::{ApiKeyStore, RegistrationPayload};
use windmesh_gateway::{ForwarderConfig, GatewayServer, Route, RouteTable};
use windmesh_registry::{RegistryServer, SweeperConfig};

const DEFAULT_API_KEYS: [&str; 2] = ["super-secret-key-123", "another-valid-key-456"];

#[derive(FromArgs)]
/// Windmesh - service registry, discovery and API gateway
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Registry(RegistryArgs),
    Gateway(GatewayArgs),
    Announce(AnnounceArgs),
    Resolve(ResolveArgs),
}

/// Arguments for running the registry.
///
/// # Example
///
/// ```bash
/// windmesh registry -b 0.0.0.0:7000 --heartbeat-timeout 30
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "registry")]
/// start the service registry
struct RegistryArgs {
    /// address to bind the registry's HTTP server to
    #[argh(option, short = 'b', default = "\"0.0.0.0:7000\".into()")]
    bind: String,

    /// seconds before the first eviction sweep
    #[argh(option, long = "initial-delay", default = "15")]
    initial_delay_secs: u64,

    /// seconds between eviction sweeps
    #[argh(option, long = "sweep-interval", default = "10")]
    sweep_interval_secs: u64,

    /// seconds without a heartbeat before an instance is evicted
    #[argh(option, long = "heartbeat-timeout", default = "30")]
    heartbeat_timeout_secs: u64,
}

/// Arguments for running the gateway.
///
/// With no `--api-key` the two stock keys are accepted; with no `--route` the
/// stock `app`, `broker` and `services` routes are installed.
#[derive(FromArgs)]
#[argh(subcommand, name = "gateway")]
/// start the API gateway
struct GatewayArgs {
    /// address to bind the gateway's HTTP server to
    #[argh(option, short = 'b', default = "\"0.0.0.0:8000\".into()")]
    bind: String,

    /// registry URL (falls back to WINDMESH_REGISTRY_URL, then http://localhost:7000)
    #[argh(option, short = 'r')]
    registry: Option<String>,

    /// accepted X-API-Key value, repeatable
    #[argh(option, long = "api-key")]
    api_keys: Vec<String>,

    /// route as prefix=service, repeatable
    #[argh(option, long = "route")]
    routes: Vec<String>,

    /// seconds to wait for a backend before answering 502
    #[argh(option, long = "backend-timeout", default = "30")]
    backend_timeout_secs: u64,

    /// largest request body forwarded, in bytes; larger bodies get 413
    #[argh(option, long = "max-body-bytes", default = "ForwarderConfig::DEFAULT_MAX_BODY_BYTES")]
    max_body_bytes: usize,
}

/// Arguments for announcing a backend instance.
///
/// Registers, heartbeats until Ctrl+C or SIGTERM, then deregisters.
#[derive(FromArgs)]
#[argh(subcommand, name = "announce")]
/// keep a backend instance registered
struct AnnounceArgs {
    /// registry URL (falls back to WINDMESH_REGISTRY_URL, then http://localhost:7000)
    #[argh(option, short = 'r')]
    registry: Option<String>,

    /// logical service name
    #[argh(option, short = 's')]
    service: String,

    /// host:port the gateway should forward to
    #[argh(option, short = 'a')]
    address: String,

    /// instance id (default: <service>-<uuid>)
    #[argh(option, long = "instance-id")]
    instance_id: Option<String>,

    /// health check URL (default: http://<address>/health)
    #[argh(option, long = "health-check-url")]
    health_check_url: Option<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "resolve")]
/// print one address for a service
struct ResolveArgs {
    /// registry URL (falls back to WINDMESH_REGISTRY_URL, then http://localhost:7000)
    #[argh(option, short = 'r')]
    registry: Option<String>,

    /// logical service name
    #[argh(positional)]
    service: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Keep resolve's stdout clean for scripting
    if !matches!(cli.command, Commands::Resolve(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Registry(args) => run_registry(args).await,
        Commands::Gateway(args) => run_gateway(args).await,
        Commands::Announce(args) => run_announce(args).await,
        Commands::Resolve(args) => run_resolve(args).await,
    }
}

fn parse_bind(bind: &str) -> Result<SocketAddr> {
    bind.parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address {}: {}", bind, e))
}

fn env_registry_url() -> Option<String> {
    std::env::var(REGISTRY_URL_ENV).ok().filter(|url| !url.is_empty())
}

fn sweeper_config(args: &RegistryArgs) -> SweeperConfig {
    SweeperConfig {
        initial_delay: Duration::from_secs(args.initial_delay_secs),
        interval: Duration::from_secs(args.sweep_interval_secs.max(1)),
        heartbeat_timeout: Duration::from_secs(args.heartbeat_timeout_secs),
    }
}

fn api_key_store(keys: Vec<String>) -> ApiKeyStore {
    if keys.is_empty() {
        ApiKeyStore::new(DEFAULT_API_KEYS)
    } else {
        ApiKeyStore::new(keys)
    }
}

fn route_table(routes: &[String]) -> Result<RouteTable> {
    if routes.is_empty() {
        return Ok(RouteTable::default());
    }
    let routes = routes
        .iter()
        .map(|route| route.parse::<Route>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RouteTable::new(routes))
}

fn announce_payload(args: &AnnounceArgs) -> RegistrationPayload {
    let payload = match &args.instance_id {
        Some(id) => RegistrationPayload::new(&args.service, id, &args.address)
            .with_health_check_url(format!("http://{}/health", args.address)),
        None => RegistrationPayload::with_generated_id(&args.service, &args.address),
    };
    match &args.health_check_url {
        Some(url) => payload.with_health_check_url(url),
        None => payload,
    }
}

async fn run_registry(args: RegistryArgs) -> Result<()> {
    let addr = parse_bind(&args.bind)?;
    let config = sweeper_config(&args);
    tracing::info!(
        "Starting registry on {} (sweep every {:?} after {:?}, timeout {:?})",
        addr,
        config.interval,
        config.initial_delay,
        config.heartbeat_timeout
    );

    RegistryServer::new(config)
        .run_until(addr, shutdown_signal())
        .await?;
    Ok(())
}

async fn run_gateway(args: GatewayArgs) -> Result<()> {
    let addr = parse_bind(&args.bind)?;
    let registry = registry_url(args.registry, env_registry_url())?;
    let routes = route_table(&args.routes)?;
    let api_keys = api_key_store(args.api_keys);

    if api_keys.is_empty() {
        tracing::warn!("No API keys configured; every request will be rejected");
    }
    tracing::info!("Starting gateway on {} with registry {}", addr, registry);

    let server = GatewayServer::new(
        api_keys,
        routes,
        HttpAddressSource::new(registry),
        ForwarderConfig {
            timeout: Duration::from_secs(args.backend_timeout_secs),
            max_body_bytes: args.max_body_bytes,
        },
    );
    server.run_until(addr, shutdown_signal()).await?;
    Ok(())
}

async fn run_announce(args: AnnounceArgs) -> Result<()> {
    let registry = registry_url(args.registry.clone(), env_registry_url())?;
    // Metadata only, never fetched by the mesh
    if let Some(url) = &args.health_check_url {
        if !url.starts_with("https://") {
            validate_http_url(url, "health check URL")?;
        }
    }

    let payload = announce_payload(&args);
    tracing::info!(
        "Announcing {} as {} at {}",
        payload.service_name,
        payload.instance_id,
        payload.address
    );

    let client = RegistrationClient::new(registry, payload);
    if !client.register().await {
        tracing::warn!("Continuing unregistered; heartbeats will re-register once the registry is back");
    }
    client.start_heartbeat();

    shutdown_signal().await;

    client.deregister().await;
    client.shutdown();
    Ok(())
}

async fn run_resolve(args: ResolveArgs) -> Result<()> {
    let registry = registry_url(args.registry, env_registry_url())?;
    let resolver = ServiceResolver::new(HttpAddressSource::new(registry));
    let address = resolver.resolve(&args.service).await?;
    println!("{}", address);
    Ok(())
}
