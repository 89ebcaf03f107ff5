//! In-memory registry of live service instances.
//!
//! The store is a map of service name to instances keyed by instance id,
//! guarded by a single lock. Every operation takes that lock once, so all
//! operations are linearizable with each other and a mutation can never be
//! observed half-applied. A service name is present only while it has at
//! least one instance.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

use windmesh_common::{AddressSource, RegistrationPayload, Result, ServiceInstance};

type Instances = BTreeMap<String, ServiceInstance>;

/// Concurrency-safe registry of service instances.
///
/// Shared between the HTTP handlers and the health sweeper behind an `Arc`.
/// It also serves as an [`AddressSource`], so a gateway running in the same
/// process can resolve against it without going over the network.
///
/// # Example
///
/// ```
/// use windmesh_common::RegistrationPayload;
/// use windmesh_registry::RegistryStore;
///
/// let store = RegistryStore::new();
/// store.register(RegistrationPayload::new("svc-a", "id-1", "10.0.0.5:8080"));
/// store.register(RegistrationPayload::new("svc-a", "id-1", "10.0.0.5:8080"));
///
/// assert_eq!(store.list_addresses("svc-a"), vec!["10.0.0.5:8080"]);
/// assert!(store.heartbeat("svc-a", "id-1"));
/// assert!(!store.heartbeat("svc-a", "id-2"));
///
/// assert!(store.deregister("svc-a", "id-1"));
/// assert!(store.dump().is_empty());
/// ```
#[derive(Default)]
pub struct RegistryStore {
    services: RwLock<HashMap<String, Instances>>,
}

impl RegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts the instance and stamps its heartbeat with the current time.
    ///
    /// Registering the same `(service, instance)` again replaces the record,
    /// so there is never more than one entry per key.
    ///
    /// # Arguments
    ///
    /// * `payload` - Service name, instance id, address and optional health URL
    ///
    /// # Returns
    ///
    /// The stored record, with `last_heartbeat` set to now
    pub fn register(&self, payload: RegistrationPayload) -> ServiceInstance {
        self.register_at(payload, SystemTime::now())
    }

    pub fn register_at(&self, payload: RegistrationPayload, now: SystemTime) -> ServiceInstance {
        let instance = ServiceInstance::from_payload(payload, now);
        self.write()
            .entry(instance.service_name.clone())
            .or_default()
            .insert(instance.instance_id.clone(), instance.clone());

        info!(
            service = %instance.service_name,
            instance = %instance.instance_id,
            address = %instance.address,
            "Instance registered"
        );
        instance
    }

    /// Refreshes the heartbeat of a known instance.
    ///
    /// Returns `false` when the instance is unknown; nothing is created in
    /// that case and the caller is expected to register again.
    pub fn heartbeat(&self, service_name: &str, instance_id: &str) -> bool {
        self.heartbeat_at(service_name, instance_id, SystemTime::now())
    }

    pub fn heartbeat_at(&self, service_name: &str, instance_id: &str, now: SystemTime) -> bool {
        let mut services = self.write();
        match services
            .get_mut(service_name)
            .and_then(|instances| instances.get_mut(instance_id))
        {
            Some(instance) => {
                instance.touch(now);
                debug!(service = %service_name, instance = %instance_id, "Heartbeat received");
                true
            }
            None => false,
        }
    }

    /// Removes an instance, and the service name with it when it was the
    /// last one. Unknown keys are a no-op; returns whether anything was removed.
    pub fn deregister(&self, service_name: &str, instance_id: &str) -> bool {
        let removed = Self::remove_locked(&mut self.write(), service_name, instance_id).is_some();
        if removed {
            info!(service = %service_name, instance = %instance_id, "Instance deregistered");
        }
        removed
    }

    /// Removes the instance only if its heartbeat is still older than
    /// `timeout` at `now`, checked under the same lock as the removal.
    ///
    /// A heartbeat that lands between a sweep's snapshot and this call keeps
    /// the instance alive.
    pub fn remove_if_stale(
        &self,
        service_name: &str,
        instance_id: &str,
        now: SystemTime,
        timeout: Duration,
    ) -> Option<ServiceInstance> {
        let mut services = self.write();
        let stale = services
            .get(service_name)
            .and_then(|instances| instances.get(instance_id))
            .and_then(|instance| instance.since_heartbeat(now))
            .is_some_and(|elapsed| elapsed > timeout);

        if stale {
            Self::remove_locked(&mut services, service_name, instance_id)
        } else {
            None
        }
    }

    /// Snapshot of the instances of one service, ordered by instance id.
    pub fn list_instances(&self, service_name: &str) -> Vec<ServiceInstance> {
        self.read()
            .get(service_name)
            .map(|instances| instances.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Addresses of one service, in the same order as [`list_instances`](Self::list_instances).
    pub fn list_addresses(&self, service_name: &str) -> Vec<String> {
        self.read()
            .get(service_name)
            .map(|instances| instances.values().map(|i| i.address.clone()).collect())
            .unwrap_or_default()
    }

    /// Full snapshot, ordered by service name.
    pub fn dump(&self) -> BTreeMap<String, Vec<ServiceInstance>> {
        self.read()
            .iter()
            .map(|(name, instances)| (name.clone(), instances.values().cloned().collect()))
            .collect()
    }

    pub fn service_count(&self) -> usize {
        self.read().len()
    }

    pub fn instance_count(&self) -> usize {
        self.read().values().map(BTreeMap::len).sum()
    }

    fn remove_locked(
        services: &mut HashMap<String, Instances>,
        service_name: &str,
        instance_id: &str,
    ) -> Option<ServiceInstance> {
        let instances = services.get_mut(service_name)?;
        let removed = instances.remove(instance_id);
        if instances.is_empty() {
            services.remove(service_name);
        }
        removed
    }

    // Every mutation completes before releasing the guard, so a poisoned
    // lock still holds a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Instances>> {
        self.services.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Instances>> {
        self.services.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Lets a gateway co-located with the registry resolve without the network.
#[async_trait]
impl AddressSource for RegistryStore {
    async fn list_addresses(&self, service_name: &str) -> Result<Vec<String>> {
        Ok(RegistryStore::list_addresses(self, service_name))
    }
}
