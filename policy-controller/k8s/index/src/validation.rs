use htnn_policy_controller_core::plugin::{PluginError, Registry};
use htnn_policy_controller_k8s_api::policy::HttpFilterPolicySpec;

/// Validates a policy's plugin configuration. A policy is valid when it
/// configures at least one plugin and every configured plugin accepts its
/// config.
pub fn validate_spec(spec: &HttpFilterPolicySpec, registry: &Registry) -> Result<(), PluginError> {
    let filters = spec
        .filters
        .iter()
        .chain(spec.sub_policies.iter().flat_map(|sp| sp.filters.iter()))
        .map(|(name, plugin)| (name, &plugin.config));
    registry.validate_all(filters)
}
