use htnn_policy_controller_core::ResourceId;
use htnn_policy_controller_k8s_api::{
    self as k8s,
    gateway::{Gateway, HTTPRoute},
    istio::{self, EnvoyFilter, VirtualService},
    policy::HttpFilterPolicy,
};
use htnn_policy_controller_k8s_index::Snapshot;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The object changed since it was read.
    #[error("{0} was modified concurrently")]
    Conflict(ResourceId),

    #[error("{0} not found")]
    NotFound(ResourceId),

    #[error("{0} already exists")]
    AlreadyExists(ResourceId),

    #[error(transparent)]
    Api(#[from] k8s::Error),
}

/// Reads and writes the cluster's objects.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn list_policies(&self) -> Result<Vec<HttpFilterPolicy>, StoreError>;

    async fn list_virtual_services(&self) -> Result<Vec<VirtualService>, StoreError>;

    async fn list_http_routes(&self) -> Result<Vec<HTTPRoute>, StoreError>;

    async fn list_istio_gateways(&self) -> Result<Vec<istio::Gateway>, StoreError>;

    async fn list_gateways(&self) -> Result<Vec<Gateway>, StoreError>;

    async fn list_envoy_filters(&self) -> Result<Vec<EnvoyFilter>, StoreError>;

    async fn get_envoy_filter(&self, id: &ResourceId) -> Result<Option<EnvoyFilter>, StoreError>;

    async fn create_envoy_filter(&self, filter: &EnvoyFilter) -> Result<(), StoreError>;

    /// Replaces an object. Fails with [`StoreError::Conflict`] unless the
    /// filter's resource version is current.
    async fn replace_envoy_filter(&self, filter: &EnvoyFilter) -> Result<(), StoreError>;

    async fn delete_envoy_filter(&self, id: &ResourceId) -> Result<(), StoreError>;

    async fn patch_policy_status(
        &self,
        id: &ResourceId,
        patch: k8s::Patch<serde_json::Value>,
    ) -> Result<(), StoreError>;

    /// Reads every input to translation.
    async fn snapshot(&self) -> Result<Snapshot, StoreError> {
        Ok(Snapshot {
            policies: self.list_policies().await?,
            virtual_services: self.list_virtual_services().await?,
            http_routes: self.list_http_routes().await?,
            istio_gateways: self.list_istio_gateways().await?,
            gateways: self.list_gateways().await?,
        })
    }
}
