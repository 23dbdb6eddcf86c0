//! EnvoyFilter objects produced by the controller.
//!
//! The controller owns two kinds of objects: a singleton that wires the golang
//! HTTP filter into every gateway and sidecar, and one object per
//! (namespace, normalized hostname) carrying route-scoped plugin configuration
//! for each virtual host whose hostname normalizes to that name.

use crate::ClusterInfo;
use htnn_policy_controller_core::{
    hostname, merge::MergedPlugins, plugin::Registry, ResourceId, VirtualHostKey,
    GOLANG_FILTER_NAME,
};
use htnn_policy_controller_k8s_api::{
    istio::{ConfigPatch, EnvoyFilter, EnvoyFilterSpec, PatchValue},
    ObjectMeta, INFO_ANNOTATION,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const GLOBAL_FILTER_NAME: &str = "htnn-http-filter";
pub const HOST_FILTER_PREFIX: &str = "htnn-h-";

const GOLANG_CONFIG_TYPE: &str =
    "type.googleapis.com/envoy.extensions.filters.http.golang.v3alpha.Config";
const GOLANG_PER_ROUTE_TYPE: &str =
    "type.googleapis.com/envoy.extensions.filters.http.golang.v3alpha.ConfigsPerRoute";
const TYPED_STRUCT_TYPE: &str = "type.googleapis.com/xds.type.v3.TypedStruct";
const GOLANG_PLUGIN_NAME: &str = "fm";
const GOLANG_LIBRARY_PATH: &str = "/etc/libgolang.so";

/// The policies an owned object was built from, as stored in its annotation.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct Info {
    #[serde(rename = "httpfilterpolicies", default)]
    pub http_filter_policies: Vec<String>,
}

pub fn host_filter_name(host: &str) -> String {
    format!("{HOST_FILTER_PREFIX}{}", hostname::to_name_fragment(host))
}

/// Returns true for names the controller may generate.
pub fn is_owned_name(name: &str) -> bool {
    name == GLOBAL_FILTER_NAME || name.starts_with(HOST_FILTER_PREFIX)
}

/// Reads the provenance annotation. Objects without it were not written by the
/// controller.
pub fn info(filter: &EnvoyFilter) -> Option<Info> {
    let value = filter.metadata.annotations.as_ref()?.get(INFO_ANNOTATION)?;
    match serde_json::from_str(value) {
        Ok(info) => Some(info),
        Err(error) => {
            tracing::debug!(%error, "Ignoring malformed provenance annotation");
            None
        }
    }
}

/// Encodes the provenance annotation. Identifiers are sorted and deduplicated
/// by the caller's set.
pub fn info_annotation<'i>(contributors: impl IntoIterator<Item = &'i ResourceId>) -> String {
    let policies = contributors
        .into_iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    json!({ "httpfilterpolicies": policies }).to_string()
}

/// Returns true if the patch was generated by the controller. Every other patch
/// in a shared object is left as found.
pub fn is_owned_patch(patch: &ConfigPatch) -> bool {
    let Some(value) = patch.patch.as_ref().and_then(|p| p.value.as_ref()) else {
        return false;
    };
    if value.get("name").and_then(Value::as_str) == Some(GOLANG_FILTER_NAME) {
        return true;
    }
    value
        .get("typed_per_filter_config")
        .and_then(Value::as_object)
        .is_some_and(|configs| configs.contains_key(GOLANG_FILTER_NAME))
}

/// Builds the singleton object that inserts the golang filter ahead of the
/// router in every gateway and sidecar.
pub fn global_filter(cluster: &ClusterInfo) -> EnvoyFilter {
    let patches = ["GATEWAY", "SIDECAR_OUTBOUND"]
        .into_iter()
        .map(|context| ConfigPatch {
            apply_to: "HTTP_FILTER".to_string(),
            r#match: Some(json!({
                "context": context,
                "listener": {
                    "filterChain": {
                        "filter": {
                            "name": "envoy.filters.network.http_connection_manager",
                            "subFilter": {"name": "envoy.filters.http.router"},
                        },
                    },
                },
            })),
            patch: Some(PatchValue {
                operation: "INSERT_BEFORE".to_string(),
                value: Some(json!({
                    "name": GOLANG_FILTER_NAME,
                    "typed_config": {
                        "@type": GOLANG_CONFIG_TYPE,
                        "library_id": GOLANG_PLUGIN_NAME,
                        "library_path": GOLANG_LIBRARY_PATH,
                        "plugin_name": GOLANG_PLUGIN_NAME,
                    },
                })),
                extra: Default::default(),
            }),
        })
        .collect();

    envoy_filter(
        &cluster.istio_root_namespace,
        GLOBAL_FILTER_NAME.to_string(),
        patches,
        info_annotation([]),
    )
}

/// Builds the object holding every patch for the hostnames sharing `name` in
/// one namespace. `name` comes from [`host_filter_name`].
pub fn host_filter<'c>(
    namespace: &str,
    name: String,
    patches: Vec<ConfigPatch>,
    contributors: impl IntoIterator<Item = &'c ResourceId>,
) -> EnvoyFilter {
    envoy_filter(namespace, name, patches, info_annotation(contributors))
}

/// Builds a patch applying merged plugins to a virtual host, or to one named
/// route within it.
pub fn route_patch(
    key: &VirtualHostKey,
    rule: Option<&str>,
    plugins: &MergedPlugins,
    registry: &Registry,
) -> ConfigPatch {
    let mut vhost = json!({ "name": key.to_string() });
    if let Some(rule) = rule {
        vhost["route"] = json!({ "name": rule });
    }

    let plugins = plugins
        .ordered(registry)
        .into_iter()
        .map(|(name, config)| json!({ "name": name, "config": config }))
        .collect::<Vec<_>>();

    ConfigPatch {
        apply_to: "HTTP_ROUTE".to_string(),
        r#match: Some(json!({ "routeConfiguration": { "vhost": vhost } })),
        patch: Some(PatchValue {
            operation: "MERGE".to_string(),
            value: Some(json!({
                "typed_per_filter_config": {
                    GOLANG_FILTER_NAME: {
                        "@type": GOLANG_PER_ROUTE_TYPE,
                        "plugins_config": {
                            GOLANG_PLUGIN_NAME: {
                                "config": {
                                    "@type": TYPED_STRUCT_TYPE,
                                    "value": { "plugins": plugins },
                                },
                            },
                        },
                    },
                },
            })),
            extra: Default::default(),
        }),
    }
}

/// Returns the virtual host name a patch matches, if any.
pub fn patch_vhost(patch: &ConfigPatch) -> Option<&str> {
    patch
        .r#match
        .as_ref()?
        .pointer("/routeConfiguration/vhost/name")?
        .as_str()
}

fn envoy_filter(
    namespace: &str,
    name: String,
    patches: Vec<ConfigPatch>,
    info: String,
) -> EnvoyFilter {
    EnvoyFilter {
        metadata: ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(name),
            annotations: Some(BTreeMap::from([(INFO_ANNOTATION.to_string(), info)])),
            ..Default::default()
        },
        spec: EnvoyFilterSpec {
            config_patches: patches,
            extra: Default::default(),
        },
    }
}
