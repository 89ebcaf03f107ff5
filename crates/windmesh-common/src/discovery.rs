use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;

/// Anything that can answer "which addresses currently serve this name".
///
/// Implementations return a fresh snapshot on every call; an unknown name is
/// an empty list, not an error. Errors are reserved for failing to ask.
#[async_trait]
pub trait AddressSource: Send + Sync {
    async fn list_addresses(&self, service_name: &str) -> Result<Vec<String>>;
}

#[async_trait]
impl<T: AddressSource + ?Sized> AddressSource for Arc<T> {
    async fn list_addresses(&self, service_name: &str) -> Result<Vec<String>> {
        (**self).list_addresses(service_name).await
    }
}
