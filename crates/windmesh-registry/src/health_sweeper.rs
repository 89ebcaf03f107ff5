use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use windmesh_common::ServiceInstance;

use crate::store::RegistryStore;

/// Sweeper timing.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Delay before the first sweep after startup
    pub initial_delay: Duration,
    /// Period between sweeps
    pub interval: Duration,
    /// An instance silent for longer than this is evicted
    pub heartbeat_timeout: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(15),
            interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(30),
        }
    }
}

/// Periodically evicts instances whose heartbeat has expired.
pub struct HealthSweeper {
    store: Arc<RegistryStore>,
    config: SweeperConfig,
}

impl HealthSweeper {
    pub fn new(store: Arc<RegistryStore>, config: SweeperConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// Starts the sweep loop on the current runtime.
    pub fn spawn(self) -> SweeperHandle {
        let task = tokio::spawn(async move {
            self.run().await;
        });
        SweeperHandle {
            task: Mutex::new(Some(task)),
        }
    }

    /// Main sweep loop
    async fn run(self) {
        info!(
            initial_delay_ms = self.config.initial_delay.as_millis() as u64,
            interval_ms = self.config.interval.as_millis() as u64,
            timeout_ms = self.config.heartbeat_timeout.as_millis() as u64,
            "Health sweeper started"
        );

        let start = Instant::now() + self.config.initial_delay;
        let mut interval = tokio::time::interval_at(start, self.config.interval);

        loop {
            interval.tick().await;
            let evicted = self.sweep(SystemTime::now());
            if !evicted.is_empty() {
                info!(
                    evicted = evicted.len(),
                    remaining = self.store.instance_count(),
                    "Sweep completed"
                );
            }
        }
    }

    /// Runs one sweep as of `now` and returns the evicted instances.
    ///
    /// Each instance is judged on its own; a record whose heartbeat lies in
    /// the future is skipped rather than failing the whole pass.
    pub fn sweep(&self, now: SystemTime) -> Vec<ServiceInstance> {
        let timeout = self.config.heartbeat_timeout;
        let mut evicted = Vec::new();

        for (service_name, instances) in self.store.dump() {
            for instance in instances {
                let Some(elapsed) = instance.since_heartbeat(now) else {
                    debug!(
                        service = %service_name,
                        instance = %instance.instance_id,
                        "Heartbeat is in the future, skipping"
                    );
                    continue;
                };
                if elapsed <= timeout {
                    continue;
                }

                // Re-checked under the write lock so a fresh heartbeat wins
                if let Some(removed) =
                    self.store
                        .remove_if_stale(&service_name, &instance.instance_id, now, timeout)
                {
                    warn!(
                        service = %removed.service_name,
                        instance = %removed.instance_id,
                        address = %removed.address,
                        elapsed_secs = elapsed.as_secs(),
                        "Evicting instance after missed heartbeats"
                    );
                    evicted.push(removed);
                }
            }
        }

        evicted
    }
}

/// Owns the running sweep task. Dropping the handle stops the task.
pub struct SweeperHandle {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SweeperHandle {
    /// Stops the sweep loop. Safe to call more than once.
    pub fn shutdown(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            info!("Health sweeper stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
