use crate::{
    core::{ResourceId, POLICY_CONTROLLER_NAME},
    index::envoy,
    k8s::{
        self,
        gateway::{Gateway, HTTPRoute},
        istio::{self, EnvoyFilter, VirtualService},
        policy::HttpFilterPolicy,
        Client, Resource, ResourceExt,
    },
    status::{Store, StoreError},
};
use anyhow::{bail, Result};
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/// Reads and writes objects through the Kubernetes API.
///
/// Kinds whose CRDs are not installed read as empty.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    kinds: Kinds,
}

/// The input kinds served by the cluster.
#[derive(Clone, Copy, Debug)]
pub struct Kinds {
    pub virtual_services: bool,
    pub istio_gateways: bool,
    pub http_routes: bool,
    pub gateways: bool,
}

// === impl KubeStore ===

impl KubeStore {
    /// Discovers the kinds served by the cluster. Fails if EnvoyFilters or
    /// HTTPFilterPolicies cannot be served.
    pub async fn discover(client: Client) -> Result<Self> {
        if !api_resource_exists::<EnvoyFilter>(&client).await {
            bail!("envoyfilters.{} resource kind not found", istio::GROUP);
        }
        if !api_resource_exists::<HttpFilterPolicy>(&client).await {
            bail!("httpfilterpolicies.{} resource kind not found", k8s::policy::GROUP);
        }

        let kinds = Kinds {
            virtual_services: api_resource_exists::<VirtualService>(&client).await,
            istio_gateways: api_resource_exists::<istio::Gateway>(&client).await,
            http_routes: api_resource_exists::<HTTPRoute>(&client).await,
            gateways: api_resource_exists::<Gateway>(&client).await,
        };
        tracing::info!(?kinds, "Discovered resource kinds");
        Ok(Self { client, kinds })
    }

    pub fn kinds(&self) -> Kinds {
        self.kinds
    }

    async fn list<T>(&self, served: bool) -> Result<Vec<T>, StoreError>
    where
        T: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned,
    {
        if !served {
            return Ok(Vec::new());
        }
        let list = k8s::Api::<T>::all(self.client.clone())
            .list(&k8s::ListParams::default())
            .await?;
        Ok(list.items)
    }

    fn envoy_filters(&self, namespace: &str) -> k8s::Api<EnvoyFilter> {
        k8s::Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl Store for KubeStore {
    async fn list_policies(&self) -> Result<Vec<HttpFilterPolicy>, StoreError> {
        self.list(true).await
    }

    async fn list_virtual_services(&self) -> Result<Vec<VirtualService>, StoreError> {
        self.list(self.kinds.virtual_services).await
    }

    async fn list_http_routes(&self) -> Result<Vec<HTTPRoute>, StoreError> {
        self.list(self.kinds.http_routes).await
    }

    async fn list_istio_gateways(&self) -> Result<Vec<istio::Gateway>, StoreError> {
        self.list(self.kinds.istio_gateways).await
    }

    async fn list_gateways(&self) -> Result<Vec<Gateway>, StoreError> {
        self.list(self.kinds.gateways).await
    }

    async fn list_envoy_filters(&self) -> Result<Vec<EnvoyFilter>, StoreError> {
        // Only objects the controller could have written are relevant.
        let filters = self.list::<EnvoyFilter>(true).await?;
        Ok(filters
            .into_iter()
            .filter(|filter| envoy::is_owned_name(&filter.name_any()))
            .collect())
    }

    async fn get_envoy_filter(&self, id: &ResourceId) -> Result<Option<EnvoyFilter>, StoreError> {
        let filter = self.envoy_filters(&id.namespace).get_opt(&id.name).await?;
        Ok(filter)
    }

    async fn create_envoy_filter(&self, filter: &EnvoyFilter) -> Result<(), StoreError> {
        let id = id(filter);
        self.envoy_filters(&id.namespace)
            .create(&post_params(), filter)
            .await
            .map_err(|error| map_error(&id, error))?;
        Ok(())
    }

    async fn replace_envoy_filter(&self, filter: &EnvoyFilter) -> Result<(), StoreError> {
        let id = id(filter);
        self.envoy_filters(&id.namespace)
            .replace(&id.name, &post_params(), filter)
            .await
            .map_err(|error| map_error(&id, error))?;
        Ok(())
    }

    async fn delete_envoy_filter(&self, id: &ResourceId) -> Result<(), StoreError> {
        self.envoy_filters(&id.namespace)
            .delete(&id.name, &k8s::DeleteParams::default())
            .await
            .map_err(|error| map_error(id, error))?;
        Ok(())
    }

    async fn patch_policy_status(
        &self,
        id: &ResourceId,
        patch: k8s::Patch<serde_json::Value>,
    ) -> Result<(), StoreError> {
        let api = k8s::Api::<HttpFilterPolicy>::namespaced(self.client.clone(), &id.namespace);
        api.patch_status(&id.name, &k8s::PatchParams::apply(POLICY_CONTROLLER_NAME), &patch)
            .await
            .map_err(|error| map_error(id, error))?;
        Ok(())
    }
}

fn id(filter: &EnvoyFilter) -> ResourceId {
    ResourceId::new(filter.namespace().unwrap_or_default(), filter.name_any())
}

fn post_params() -> k8s::PostParams {
    k8s::PostParams {
        field_manager: Some(POLICY_CONTROLLER_NAME.to_string()),
        ..Default::default()
    }
}

/// Distinguishes the API errors a pass recovers from.
fn map_error(id: &ResourceId, error: k8s::Error) -> StoreError {
    match &error {
        k8s::Error::Api(k8s::ErrorResponse { code: 404, .. }) => StoreError::NotFound(id.clone()),
        k8s::Error::Api(k8s::ErrorResponse { code: 409, reason, .. })
            if reason == "AlreadyExists" =>
        {
            StoreError::AlreadyExists(id.clone())
        }
        k8s::Error::Api(k8s::ErrorResponse { code: 409, .. }) => StoreError::Conflict(id.clone()),
        _ => StoreError::Api(error),
    }
}

async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}
