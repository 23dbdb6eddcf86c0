//! Plans the writes that converge observed EnvoyFilters on the desired set.
//!
//! Only objects with a controller-generated name *and* a provenance annotation
//! are considered owned. An object that shares a desired name but lacks the
//! annotation is adopted: its foreign patches are kept verbatim ahead of the
//! controller's patches. When an owned object is no longer desired, its foreign
//! patches are released rather than deleted along with it.

use htnn_policy_controller_core::ResourceId;
use htnn_policy_controller_k8s_api::{
    istio::{ConfigPatch, EnvoyFilter},
    ResourceExt, INFO_ANNOTATION,
};
use htnn_policy_controller_k8s_index::envoy;
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
pub enum Op {
    Create(EnvoyFilter),
    /// Carries the observed resource version, so the write is conditional.
    Replace(EnvoyFilter),
    Delete(ResourceId),
}

// === impl Op ===

impl Op {
    pub fn id(&self) -> ResourceId {
        match self {
            Self::Create(filter) | Self::Replace(filter) => id(filter),
            Self::Delete(id) => id.clone(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Replace(_) => "replace",
            Self::Delete(_) => "delete",
        }
    }
}

pub fn id(filter: &EnvoyFilter) -> ResourceId {
    ResourceId::new(filter.namespace().unwrap_or_default(), filter.name_any())
}

/// Plans writes for every desired object, then for every owned object that is
/// no longer desired.
pub fn plan(desired: &[EnvoyFilter], observed: &[EnvoyFilter]) -> Vec<Op> {
    let mut observed = observed
        .iter()
        .map(|filter| (id(filter), filter))
        .collect::<BTreeMap<_, _>>();

    let mut ops = desired
        .iter()
        .filter_map(|filter| plan_one(Some(filter), observed.remove(&id(filter))))
        .collect::<Vec<_>>();
    ops.extend(
        observed
            .into_values()
            .filter_map(|filter| plan_one(None, Some(filter))),
    );
    ops
}

/// Plans the write, if any, for a single object identity.
pub fn plan_one(desired: Option<&EnvoyFilter>, observed: Option<&EnvoyFilter>) -> Option<Op> {
    match (desired, observed) {
        (Some(desired), None) => Some(Op::Create(desired.clone())),
        (Some(desired), Some(observed)) => {
            let mut next = observed.clone();
            next.spec.config_patches = foreign_patches(observed);
            next.spec
                .config_patches
                .extend(desired.spec.config_patches.iter().cloned());
            let info = desired.annotations().get(INFO_ANNOTATION).cloned();
            match info {
                Some(info) => {
                    next.annotations_mut()
                        .insert(INFO_ANNOTATION.to_string(), info);
                }
                None => {
                    next.annotations_mut().remove(INFO_ANNOTATION);
                }
            }
            if next.spec == observed.spec && next.annotations() == observed.annotations() {
                return None;
            }
            Some(Op::Replace(next))
        }
        (None, Some(observed)) => {
            if !is_owned(observed) {
                return None;
            }
            let foreign = foreign_patches(observed);
            if foreign.is_empty() {
                return Some(Op::Delete(id(observed)));
            }
            let mut next = observed.clone();
            next.spec.config_patches = foreign;
            next.annotations_mut().remove(INFO_ANNOTATION);
            Some(Op::Replace(next))
        }
        (None, None) => None,
    }
}

/// Returns true if the controller wrote the object.
pub fn is_owned(filter: &EnvoyFilter) -> bool {
    envoy::is_owned_name(&filter.name_any()) && envoy::info(filter).is_some()
}

fn foreign_patches(filter: &EnvoyFilter) -> Vec<ConfigPatch> {
    filter
        .spec
        .config_patches
        .iter()
        .filter(|patch| !envoy::is_owned_patch(patch))
        .cloned()
        .collect()
}
