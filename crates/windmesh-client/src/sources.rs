use async_trait::async_trait;
use hyper::StatusCode;
use std::time::Duration;

use windmesh_common::http::{encode_path_segment, join_url};
use windmesh_common::{AddressSource, JsonHttpClient, MeshError, Result};

/// Asks a remote registry for addresses over HTTP.
#[derive(Clone)]
pub struct HttpAddressSource {
    registry_url: String,
    http: JsonHttpClient,
}

impl HttpAddressSource {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(registry_url: impl Into<String>) -> Self {
        Self::with_timeout(registry_url, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(registry_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            registry_url: registry_url.into(),
            http: JsonHttpClient::new(timeout),
        }
    }

    pub fn registry_url(&self) -> &str {
        &self.registry_url
    }
}

#[async_trait]
impl AddressSource for HttpAddressSource {
    /// `GET /services/{name}` with the name sent as one encoded path
    /// segment. A 404 from an older registry counts as "no instances"; any
    /// other non-200 status is an error.
    async fn list_addresses(&self, service_name: &str) -> Result<Vec<String>> {
        if service_name.is_empty() {
            return Err(MeshError::InvalidRequest(format!(
                "Invalid service name: {:?}",
                service_name
            )));
        }

        let path = format!("/services/{}", encode_path_segment(service_name));
        let url = join_url(&self.registry_url, &path);
        let response = self.http.get(&url).await?;

        if response.status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        response.expect_status(StatusCode::OK)?.json()
    }
}
