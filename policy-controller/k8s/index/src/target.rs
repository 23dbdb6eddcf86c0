use crate::{
    route::RouteKind,
    route_index::{RouteIndex, RouteKey},
};
use htnn_policy_controller_core::ResourceId;
use htnn_policy_controller_k8s_api::{
    gateway::HTTPRoute, istio::VirtualService, policy::HttpFilterPolicy, ResourceExt,
};

/// The outcome of resolving a policy's target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Resolved {
        route: RouteKey,
        section_name: Option<String>,
    },
    NotFound(TargetNotFound),
    Invalid(InvalidTarget),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidTarget {
    #[error("targetRef is required")]
    Missing,

    #[error("unsupported target kind {0}")]
    UnsupportedKind(String),

    #[error("cross-namespace target {target} is not allowed from namespace {namespace}")]
    CrossNamespace { namespace: String, target: String },
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TargetNotFound {
    #[error("{} {} not found", .0.kind.as_str(), .0.id)]
    Route(RouteKey),

    #[error("rule {rule} not found in {} {}", .route.kind.as_str(), .route.id)]
    Rule { route: RouteKey, rule: String },
}

/// Returns the key of the route a policy targets, without checking that the
/// route exists.
pub fn route_key(policy: &HttpFilterPolicy) -> Result<RouteKey, InvalidTarget> {
    let target = policy
        .spec
        .target_ref
        .as_ref()
        .ok_or(InvalidTarget::Missing)?;

    let kind = if target.targets_kind::<VirtualService>() {
        RouteKind::VirtualService
    } else if target.targets_kind::<HTTPRoute>() {
        RouteKind::HttpRoute
    } else {
        return Err(InvalidTarget::UnsupportedKind(target.canonical_kind()));
    };

    let namespace = policy.namespace().unwrap_or_default();
    if let Some(target_ns) = target.namespace.as_deref() {
        if target_ns != namespace {
            return Err(InvalidTarget::CrossNamespace {
                namespace,
                target: format!("{target_ns}/{}", target.name),
            });
        }
    }

    Ok(RouteKey::new(kind, ResourceId::new(namespace, &target.name)))
}

/// Resolves a policy's target against the routes currently in the index.
pub fn resolve(policy: &HttpFilterPolicy, index: &RouteIndex<'_>) -> Resolution {
    let id = ResourceId::new(policy.namespace().unwrap_or_default(), policy.name_any());
    let key = match index.target_of(&id) {
        Some(key) => key.clone(),
        // Policies outside the index, and those with an invalid target.
        None => match route_key(policy) {
            Ok(key) => key,
            Err(error) => return Resolution::Invalid(error),
        },
    };

    let Some(route) = index.route(&key) else {
        return Resolution::NotFound(TargetNotFound::Route(key));
    };

    let section_name = policy
        .spec
        .target_ref
        .as_ref()
        .and_then(|target| target.section_name.clone());
    if let Some(rule) = section_name.as_deref() {
        if !route.has_rule(rule) {
            return Resolution::NotFound(TargetNotFound::Rule {
                route: key,
                rule: rule.to_string(),
            });
        }
    }

    Resolution::Resolved {
        route: key,
        section_name,
    }
}
