use crate::Condition;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const GROUP: &str = "htnn.mosn.io";

/// Attaches HTTP plugins to a route, or to a single rule of a route.
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    kube::CustomResource,
    Deserialize,
    Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "htnn.mosn.io",
    version = "v1",
    kind = "HTTPFilterPolicy",
    root = "HttpFilterPolicy",
    status = "HttpFilterPolicyStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HttpFilterPolicySpec {
    /// Policies embedded in a route's annotation have no target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<PolicyTargetReference>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filters: BTreeMap<String, HttpPlugin>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_policies: Vec<SubPolicy>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTargetReference {
    pub group: String,
    pub kind: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct HttpPlugin {
    #[serde(default)]
    pub config: Value,
}

/// Plugins scoped to one named rule of the targeted route.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubPolicy {
    pub section_name: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filters: BTreeMap<String, HttpPlugin>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct HttpFilterPolicyStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

// === impl PolicyTargetReference ===

impl PolicyTargetReference {
    /// Checks whether the target references the given resource type.
    pub fn targets_kind<T>(&self) -> bool
    where
        T: kube::Resource,
        T::DynamicType: Default,
    {
        let dt = Default::default();
        *self.group == *T::group(&dt) && *self.kind == *T::kind(&dt)
    }

    /// Returns the target kind qualified by its group.
    pub fn canonical_kind(&self) -> String {
        if self.group.is_empty() {
            return self.kind.clone();
        }
        format!("{}.{}", self.kind, self.group)
    }
}

// === impl HttpFilterPolicySpec ===

impl HttpFilterPolicySpec {
    /// Returns the route-wide plugin configurations.
    pub fn plugin_configs(&self) -> BTreeMap<String, Value> {
        plugin_configs(&self.filters)
    }
}

// === impl SubPolicy ===

impl SubPolicy {
    pub fn plugin_configs(&self) -> BTreeMap<String, Value> {
        plugin_configs(&self.filters)
    }
}

fn plugin_configs(filters: &BTreeMap<String, HttpPlugin>) -> BTreeMap<String, Value> {
    filters
        .iter()
        .map(|(name, plugin)| (name.clone(), plugin.config.clone()))
        .collect()
}
