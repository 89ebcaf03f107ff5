//! Registration client embedded in every backend service.
//!
//! Registers the process with the registry once at startup, keeps it alive
//! with periodic heartbeats, and takes it out again on shutdown.
//!
//! # Example
//!
//! ```no_run
//! use windmesh_client::RegistrationClient;
//! use windmesh_common::RegistrationPayload;
//!
//! # async fn demo() {
//! let payload = RegistrationPayload::with_generated_id("application-server", "10.0.0.5:8080");
//! let client = RegistrationClient::new("http://localhost:7000", payload);
//!
//! if !client.register().await {
//!     // keep serving, just undiscoverable
//! }
//! client.start_heartbeat();
//!
//! // ... on shutdown
//! client.deregister().await;
//! client.shutdown();
//! # }
//! ```

use hyper::StatusCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use windmesh_common::http::join_url;
use windmesh_common::{JsonHttpClient, RegistrationPayload, Result};

/// Startup registration retry policy.
///
/// A fixed delay between attempts, not exponential backoff: registration is
/// a one-time startup dependency.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Pause between two attempts
    pub delay: Duration,
    /// Bound on each individual registry call
    pub request_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(3),
            request_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub initial_delay: Duration,
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            interval: Duration::from_secs(12),
        }
    }
}

/// Keeps one backend instance registered.
///
/// The client owns the payload it registers with; every later heartbeat,
/// re-registration and deregistration uses that same `(service, instance)`
/// key. At most one heartbeat task exists per client, and no new registry
/// call starts once [`shutdown`](Self::shutdown) has returned.
pub struct RegistrationClient {
    registry_url: String,
    payload: RegistrationPayload,
    http: JsonHttpClient,
    retry: RetryConfig,
    heartbeat: HeartbeatConfig,
    task: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl RegistrationClient {
    /// Creates a client with the default retry and heartbeat timing.
    pub fn new(registry_url: impl Into<String>, payload: RegistrationPayload) -> Self {
        Self::with_config(
            registry_url,
            payload,
            RetryConfig::default(),
            HeartbeatConfig::default(),
        )
    }

    pub fn with_config(
        registry_url: impl Into<String>,
        payload: RegistrationPayload,
        retry: RetryConfig,
        heartbeat: HeartbeatConfig,
    ) -> Self {
        Self {
            registry_url: registry_url.into(),
            payload,
            http: JsonHttpClient::new(retry.request_timeout),
            retry,
            heartbeat,
            task: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn payload(&self) -> &RegistrationPayload {
        &self.payload
    }

    /// Registers the retained payload, retrying on any failure.
    ///
    /// Makes at most [`RetryConfig::max_attempts`] calls to `POST /register`,
    /// each bounded by [`RetryConfig::request_timeout`] and separated by
    /// [`RetryConfig::delay`]. Any status other than `201 Created` counts as
    /// a failed attempt.
    ///
    /// # Returns
    ///
    /// `true` on the first `201 Created`. `false` once every attempt has
    /// failed; callers should keep running in a degraded, undiscoverable
    /// mode instead of exiting.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use windmesh_client::RegistrationClient;
    /// use windmesh_common::RegistrationPayload;
    ///
    /// # async fn demo() {
    /// let client = RegistrationClient::new(
    ///     "http://localhost:7000",
    ///     RegistrationPayload::new("svc-a", "id-1", "10.0.0.5:8080"),
    /// );
    /// let registered = client.register().await;
    /// println!("discoverable: {}", registered);
    /// # }
    /// ```
    pub async fn register(&self) -> bool {
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match send_registration(&self.http, &self.registry_url, &self.payload).await {
                Ok(()) => {
                    info!(
                        service = %self.payload.service_name,
                        instance = %self.payload.instance_id,
                        attempt,
                        "Registered with registry"
                    );
                    return true;
                }
                Err(e) => {
                    warn!(
                        op = "register",
                        service = %self.payload.service_name,
                        instance = %self.payload.instance_id,
                        error = %e,
                        "Registration attempt {}/{} failed",
                        attempt,
                        max_attempts
                    );
                    if attempt < max_attempts {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
            }
        }

        error!(
            service = %self.payload.service_name,
            instance = %self.payload.instance_id,
            "Registration failed after {} attempts; running in degraded, undiscoverable mode",
            max_attempts
        );
        false
    }

    /// Starts the heartbeat task. Calling it again while the task runs, or
    /// after [`shutdown`](Self::shutdown), does nothing.
    pub fn start_heartbeat(&self) {
        // The flag is only written while this lock is held
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if self.shut_down.load(Ordering::SeqCst) {
            debug!("Heartbeat not started: client already shut down");
            return;
        }
        if task.is_some() {
            return;
        }

        let http = self.http.clone();
        let registry_url = self.registry_url.clone();
        let payload = self.payload.clone();
        let config = self.heartbeat.clone();

        *task = Some(tokio::spawn(async move {
            run_heartbeat(http, registry_url, payload, config).await;
        }));
    }

    pub fn is_heartbeating(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Removes this instance from the registry with a single call.
    ///
    /// Failures are logged and never retried; the sweeper evicts the
    /// instance eventually anyway. Does nothing after shutdown.
    pub async fn deregister(&self) -> bool {
        if self.shut_down.load(Ordering::SeqCst) {
            return false;
        }

        let url = join_url(&self.registry_url, "/deregister");
        let result = self
            .http
            .post_json(&url, &self.payload.key())
            .await
            .and_then(|response| response.expect_status(StatusCode::OK));

        match result {
            Ok(_) => {
                info!(
                    service = %self.payload.service_name,
                    instance = %self.payload.instance_id,
                    "Deregistered from registry"
                );
                true
            }
            Err(e) => {
                warn!(
                    op = "deregister",
                    service = %self.payload.service_name,
                    instance = %self.payload.instance_id,
                    error = %e,
                    "Deregistration failed"
                );
                false
            }
        }
    }

    /// Cancels the heartbeat task without waiting for an in-flight call.
    /// Idempotent.
    pub fn shutdown(&self) {
        let task = {
            let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
            if self.shut_down.swap(true, Ordering::SeqCst) {
                return;
            }
            task.take()
        };
        if let Some(task) = task {
            task.abort();
        }
        info!(instance = %self.payload.instance_id, "Registration client shut down");
    }
}

impl Drop for RegistrationClient {
    fn drop(&mut self) {
        let task = self.task.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// One registration call: success only on `201 Created`.
async fn send_registration(
    http: &JsonHttpClient,
    registry_url: &str,
    payload: &RegistrationPayload,
) -> Result<()> {
    let url = join_url(registry_url, "/register");
    http.post_json(&url, payload)
        .await?
        .expect_status(StatusCode::CREATED)?;
    Ok(())
}

/// Heartbeat loop
async fn run_heartbeat(
    http: JsonHttpClient,
    registry_url: String,
    payload: RegistrationPayload,
    config: HeartbeatConfig,
) {
    let url = join_url(&registry_url, "/heartbeat");
    let key = payload.key();
    let mut interval = tokio::time::interval_at(Instant::now() + config.initial_delay, config.interval);

    loop {
        interval.tick().await;

        match http.post_json(&url, &key).await {
            Ok(response) if response.status == StatusCode::OK => {
                debug!(instance = %key.instance_id, "Heartbeat sent");
            }
            Ok(response) if response.status == StatusCode::NOT_FOUND => {
                warn!(
                    service = %key.service_name,
                    instance = %key.instance_id,
                    "Registry does not know this instance, re-registering"
                );
                // One attempt only; the next tick tries again if this fails
                if let Err(e) = send_registration(&http, &registry_url, &payload).await {
                    warn!(
                        op = "re-register",
                        instance = %key.instance_id,
                        error = %e,
                        "Re-registration failed"
                    );
                }
            }
            Ok(response) => {
                warn!(
                    op = "heartbeat",
                    instance = %key.instance_id,
                    status = response.status.as_u16(),
                    "Heartbeat rejected"
                );
            }
            Err(e) => {
                warn!(
                    op = "heartbeat",
                    instance = %key.instance_id,
                    error = %e,
                    "Heartbeat failed"
                );
            }
        }
    }
}
