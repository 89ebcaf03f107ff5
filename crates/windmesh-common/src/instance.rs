//! Registry wire types.
//!
//! Field names are camelCase on the wire (`serviceName`, `instanceId`,
//! `address`, `healthCheckUrl`, `lastHeartbeat`) so every service in the
//! mesh speaks the same JSON regardless of which crate built the body.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Identifies one instance of a logical service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceKey {
    pub service_name: String,
    pub instance_id: String,
}

impl InstanceKey {
    pub fn new(service_name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            instance_id: instance_id.into(),
        }
    }
}

/// What a backend process announces about itself at startup.
///
/// Built once per process and reused for every heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationPayload {
    pub service_name: String,
    pub instance_id: String,
    /// `host:port` the gateway forwards to
    pub address: String,
    #[serde(default)]
    pub health_check_url: Option<String>,
}

impl RegistrationPayload {
    pub fn new(
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            instance_id: instance_id.into(),
            address: address.into(),
            health_check_url: None,
        }
    }

    /// Builds a payload whose instance id is `<service>-<uuid v4>`, so that
    /// restarts of the same logical service never collide, with the health
    /// URL pointing at `http://<address>/health`.
    pub fn with_generated_id(service_name: impl Into<String>, address: impl Into<String>) -> Self {
        let service_name = service_name.into();
        let address = address.into();
        let instance_id = format!("{}-{}", service_name, uuid::Uuid::new_v4());
        let health_check_url = format!("http://{}/health", address);
        Self::new(service_name, instance_id, address).with_health_check_url(health_check_url)
    }

    pub fn with_health_check_url(mut self, url: impl Into<String>) -> Self {
        self.health_check_url = Some(url.into());
        self
    }

    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.service_name.clone(), self.instance_id.clone())
    }
}

/// A registered instance as held by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    pub service_name: String,
    pub instance_id: String,
    pub address: String,
    #[serde(default)]
    pub health_check_url: Option<String>,
    /// Serialized as milliseconds since the Unix epoch.
    #[serde(with = "epoch_millis")]
    pub last_heartbeat: SystemTime,
}

impl ServiceInstance {
    pub fn from_payload(payload: RegistrationPayload, now: SystemTime) -> Self {
        Self {
            service_name: payload.service_name,
            instance_id: payload.instance_id,
            address: payload.address,
            health_check_url: payload.health_check_url,
            last_heartbeat: now,
        }
    }

    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.service_name.clone(), self.instance_id.clone())
    }

    /// Time since the last accepted register/heartbeat.
    ///
    /// `None` when `last_heartbeat` lies after `now` (clock stepped back).
    pub fn since_heartbeat(&self, now: SystemTime) -> Option<Duration> {
        now.duration_since(self.last_heartbeat).ok()
    }

    /// Moves `last_heartbeat` to `now`, never backwards.
    pub fn touch(&mut self, now: SystemTime) {
        if now > self.last_heartbeat {
            self.last_heartbeat = now;
        }
    }
}

mod epoch_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SystemTime, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_millis(millis))
    }
}
