use crate::{route::Route, validation};
use htnn_policy_controller_core::{
    plugin::{PluginError, Registry},
    ResourceId,
};
use htnn_policy_controller_k8s_api::{policy::HttpFilterPolicySpec, EMBEDDED_POLICY_ANNOTATION};

/// A policy carried in a route's annotation. It always targets the route that
/// carries it.
#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddedPolicy {
    pub id: ResourceId,
    pub spec: HttpFilterPolicySpec,
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddedError {
    #[error("failed to parse embedded policy: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

#[derive(serde::Deserialize)]
struct Embedded {
    #[serde(default)]
    spec: HttpFilterPolicySpec,
}

/// Reads and validates the policy embedded in a route, if any.
pub fn parse(
    route: Route<'_>,
    registry: &Registry,
) -> Result<Option<EmbeddedPolicy>, EmbeddedError> {
    let Some(value) = route.annotations().get(EMBEDDED_POLICY_ANNOTATION) else {
        return Ok(None);
    };

    let Embedded { spec } = serde_json::from_str(value)?;
    validation::validate_spec(&spec, registry)?;

    let name = format!(
        "embedded-{}-{}",
        route.kind().as_str().to_ascii_lowercase(),
        route.name()
    );
    Ok(Some(EmbeddedPolicy {
        id: ResourceId::new(route.namespace(), name),
        spec,
    }))
}
