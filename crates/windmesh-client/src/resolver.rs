use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use windmesh_common::{AddressSource, MeshError, Result};

/// Round-robin address resolver over a live address source.
///
/// The address list is fetched fresh on every call and one counter per
/// service name picks the next entry. Under a stable membership of N
/// addresses, N consecutive calls visit every address once. While membership
/// churns the rotation is best-effort only.
pub struct ServiceResolver<S> {
    source: S,
    counters: DashMap<String, AtomicU64>,
}

impl<S: AddressSource> ServiceResolver<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            counters: DashMap::new(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Picks the next address for `service_name`.
    ///
    /// Both "no instances" and "could not ask the source" surface as
    /// [`MeshError::ServiceUnavailable`]; the cause of the latter is logged.
    pub async fn resolve(&self, service_name: &str) -> Result<String> {
        let addresses = match self.source.list_addresses(service_name).await {
            Ok(addresses) => addresses,
            Err(e) => {
                warn!(
                    op = "resolve",
                    service = %service_name,
                    error = %e,
                    "Address lookup failed"
                );
                return Err(MeshError::ServiceUnavailable(service_name.to_string()));
            }
        };

        if addresses.is_empty() {
            debug!(service = %service_name, "No instances registered");
            return Err(MeshError::ServiceUnavailable(service_name.to_string()));
        }

        let index = self.next_index(service_name);
        let address = select_address(index, &addresses).to_string();
        debug!(service = %service_name, address = %address, "Resolved");
        Ok(address)
    }

    /// Returns the current counter value for `service_name` and advances it.
    ///
    /// Counters are created at zero on first use.
    pub fn next_index(&self, service_name: &str) -> u64 {
        // Existing names take only a shard read lock
        if let Some(counter) = self.counters.get(service_name) {
            return counter.fetch_add(1, Ordering::Relaxed);
        }

        self.counters
            .entry(service_name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed)
    }
}

/// `addresses[index mod len]`. `addresses` must be non-empty.
pub fn select_address(index: u64, addresses: &[String]) -> &str {
    let slot = (index % addresses.len() as u64) as usize;
    &addresses[slot]
}
