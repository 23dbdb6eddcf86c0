use crate::{ControllerMetrics, Reconciler, Store, StoreError};
use htnn_policy_controller_core::{plugin::Registry, ResourceId};
use htnn_policy_controller_k8s_api::{
    self as k8s,
    gateway::{Gateway, HTTPRoute},
    istio::{self, EnvoyFilter, HttpRoute, Port, Server, VirtualService},
    policy::{HttpFilterPolicy, HttpFilterPolicySpec, HttpFilterPolicyStatus},
    ObjectMeta, ResourceExt, Time,
};
use htnn_policy_controller_k8s_index::{ClusterInfo, Snapshot, Translator};
use maplit::btreemap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};


/// An in-memory cluster that versions EnvoyFilters like the API server does.
#[derive(Clone, Default)]
struct MemStore(Arc<Mutex<State>>);

#[derive(Default)]
struct State {
    snapshot: Snapshot,
    envoy_filters: BTreeMap<ResourceId, EnvoyFilter>,
    version: u64,
    writes: Vec<String>,
    /// Objects modified concurrently right before their next replace.
    conflict_once: BTreeSet<ResourceId>,
}

// === impl MemStore ===

impl MemStore {
    fn new(snapshot: Snapshot) -> Self {
        let store = Self::default();
        store.0.lock().snapshot = snapshot;
        store
    }

    fn update(&self, f: impl FnOnce(&mut Snapshot)) {
        f(&mut self.0.lock().snapshot);
    }

    fn insert_envoy_filter(&self, mut filter: EnvoyFilter) {
        let mut state = self.0.lock();
        state.version += 1;
        filter.metadata.resource_version = Some(state.version.to_string());
        state
            .envoy_filters
            .insert(crate::diff::id(&filter), filter);
    }

    fn remove_envoy_filter(&self, id: &ResourceId) {
        self.0.lock().envoy_filters.remove(id);
    }

    fn envoy_filter(&self, ns: &str, name: &str) -> Option<EnvoyFilter> {
        self.0
            .lock()
            .envoy_filters
            .get(&ResourceId::new(ns, name))
            .cloned()
    }

    fn envoy_filter_ids(&self) -> Vec<ResourceId> {
        self.0.lock().envoy_filters.keys().cloned().collect()
    }

    fn conflict_once(&self, id: ResourceId) {
        self.0.lock().conflict_once.insert(id);
    }

    fn take_writes(&self) -> Vec<String> {
        std::mem::take(&mut self.0.lock().writes)
    }

    /// Returns the reason of the policy's condition, if any.
    fn reason(&self, ns: &str, name: &str) -> Option<String> {
        let state = self.0.lock();
        let policy = state
            .snapshot
            .policies
            .iter()
            .find(|p| p.namespace().as_deref() == Some(ns) && p.name_any() == name)?;
        let status = policy.status.as_ref()?;
        assert_eq!(status.conditions.len(), 1, "exactly one condition");
        Some(status.conditions[0].reason.clone())
    }

    fn bump(state: &mut State, filter: &mut EnvoyFilter) {
        state.version += 1;
        filter.metadata.resource_version = Some(state.version.to_string());
    }
}

#[async_trait::async_trait]
impl Store for MemStore {
    async fn list_policies(&self) -> Result<Vec<HttpFilterPolicy>, StoreError> {
        Ok(self.0.lock().snapshot.policies.clone())
    }

    async fn list_virtual_services(&self) -> Result<Vec<VirtualService>, StoreError> {
        Ok(self.0.lock().snapshot.virtual_services.clone())
    }

    async fn list_http_routes(&self) -> Result<Vec<HTTPRoute>, StoreError> {
        Ok(self.0.lock().snapshot.http_routes.clone())
    }

    async fn list_istio_gateways(&self) -> Result<Vec<istio::Gateway>, StoreError> {
        Ok(self.0.lock().snapshot.istio_gateways.clone())
    }

    async fn list_gateways(&self) -> Result<Vec<Gateway>, StoreError> {
        Ok(self.0.lock().snapshot.gateways.clone())
    }

    async fn list_envoy_filters(&self) -> Result<Vec<EnvoyFilter>, StoreError> {
        Ok(self.0.lock().envoy_filters.values().cloned().collect())
    }

    async fn get_envoy_filter(&self, id: &ResourceId) -> Result<Option<EnvoyFilter>, StoreError> {
        Ok(self.0.lock().envoy_filters.get(id).cloned())
    }

    async fn create_envoy_filter(&self, filter: &EnvoyFilter) -> Result<(), StoreError> {
        let id = crate::diff::id(filter);
        let mut state = self.0.lock();
        if state.envoy_filters.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }
        let mut filter = filter.clone();
        MemStore::bump(&mut state, &mut filter);
        state.writes.push(format!("create {id}"));
        state.envoy_filters.insert(id, filter);
        Ok(())
    }

    async fn replace_envoy_filter(&self, filter: &EnvoyFilter) -> Result<(), StoreError> {
        let id = crate::diff::id(filter);
        let mut state = self.0.lock();
        let state = &mut *state;
        let Some(current) = state.envoy_filters.get_mut(&id) else {
            return Err(StoreError::NotFound(id));
        };
        if state.conflict_once.remove(&id) {
            state.version += 1;
            current.metadata.resource_version = Some(state.version.to_string());
            return Err(StoreError::Conflict(id));
        }
        if current.metadata.resource_version != filter.metadata.resource_version {
            return Err(StoreError::Conflict(id));
        }
        state.version += 1;
        let mut filter = filter.clone();
        filter.metadata.resource_version = Some(state.version.to_string());
        *current = filter;
        state.writes.push(format!("replace {id}"));
        Ok(())
    }

    async fn delete_envoy_filter(&self, id: &ResourceId) -> Result<(), StoreError> {
        let mut state = self.0.lock();
        if state.envoy_filters.remove(id).is_none() {
            return Err(StoreError::NotFound(id.clone()));
        }
        state.writes.push(format!("delete {id}"));
        Ok(())
    }

    async fn patch_policy_status(
        &self,
        id: &ResourceId,
        patch: k8s::Patch<Value>,
    ) -> Result<(), StoreError> {
        let k8s::Patch::Merge(patch) = patch else {
            panic!("unexpected patch type: {patch:?}");
        };
        let status: HttpFilterPolicyStatus =
            serde_json::from_value(patch["status"].clone()).expect("valid status");
        let mut state = self.0.lock();
        let state = &mut *state;
        let Some(policy) = state.snapshot.policies.iter_mut().find(|p| {
            p.namespace().as_deref() == Some(id.namespace.as_str()) && p.name_any() == id.name
        }) else {
            return Err(StoreError::NotFound(id.clone()));
        };
        policy.status = Some(status);
        state.writes.push(format!("status {id}"));
        Ok(())
    }
}

fn reconciler(store: &MemStore) -> Reconciler<MemStore> {
    Reconciler::new(
        store.clone(),
        Translator::new(Registry::with_builtins(), ClusterInfo::default()),
        ControllerMetrics::default(),
    )
}

fn mk_meta(ns: &str, name: &str, created: i64) -> ObjectMeta {
    ObjectMeta {
        namespace: Some(ns.to_string()),
        name: Some(name.to_string()),
        generation: Some(1),
        creation_timestamp: Some(Time(
            chrono::DateTime::from_timestamp(created, 0).expect("valid timestamp"),
        )),
        ..Default::default()
    }
}

fn mk_policy(ns: &str, name: &str, spec: Value) -> HttpFilterPolicy {
    let spec: HttpFilterPolicySpec = serde_json::from_value(spec).expect("valid policy spec");
    let mut policy = HttpFilterPolicy::new(name, spec);
    policy.metadata = mk_meta(ns, name, 1);
    policy
}

fn demo_policy(ns: &str, name: &str, vs: &str, host_name: &str) -> HttpFilterPolicy {
    mk_policy(
        ns,
        name,
        json!({
            "targetRef": {"group": "networking.istio.io", "kind": "VirtualService", "name": vs},
            "filters": {"demo": {"config": {"hostName": host_name}}},
        }),
    )
}

fn mk_vs(ns: &str, name: &str, host: &str, gateway: &str) -> VirtualService {
    let mut vs = VirtualService::new(
        name,
        istio::VirtualServiceSpec {
            hosts: vec![host.to_string()],
            gateways: vec![gateway.to_string()],
            http: vec![HttpRoute {
                name: Some("route".to_string()),
                extra: btreemap! {
                    "route".to_string() =>
                        json!([{"destination": {"host": "httpbin", "port": {"number": 8000}}}]),
                },
            }],
            extra: Default::default(),
        },
    );
    vs.metadata = mk_meta(ns, name, 0);
    vs
}

fn mk_istio_gw(ns: &str, name: &str, port: u32, host: &str) -> istio::Gateway {
    let mut gw = istio::Gateway::new(
        name,
        istio::GatewaySpec {
            servers: vec![Server {
                port: Port {
                    number: port,
                    name: Some(format!("http-{port}")),
                    protocol: Some("HTTP".to_string()),
                },
                hosts: vec![host.to_string()],
                extra: Default::default(),
            }],
            extra: Default::default(),
        },
    );
    gw.metadata = mk_meta(ns, name, 0);
    gw
}

/// `default/vs` serves `default.local` through `default/gw` on 8888, and
/// `default/policy` configures the demo plugin on it.
fn scenario() -> Snapshot {
    Snapshot {
        policies: vec![demo_policy("default", "policy", "vs", "Mike")],
        virtual_services: vec![mk_vs("default", "vs", "default.local", "gw")],
        istio_gateways: vec![mk_istio_gw("default", "gw", 8888, "default.local")],
        ..Default::default()
    }
}

/// Returns the virtual host names matched by an object's patches.
fn vhosts(filter: &EnvoyFilter) -> Vec<String> {
    filter
        .spec
        .config_patches
        .iter()
        .filter_map(htnn_policy_controller_k8s_index::envoy::patch_vhost)
        .map(ToString::to_string)
        .collect()
}
