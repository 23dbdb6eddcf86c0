//! Layered merging of plugin configurations.
//!
//! Contributions are applied in ascending precedence: embedded policies, then
//! sub-policies of direct policies, then direct policies. Within a layer,
//! contributions apply in creation order (ties broken by identity) and a
//! route-wide contribution applies before a rule-scoped one. A later
//! contribution replaces an earlier plugin's config wholesale.

use crate::{plugin::Registry, ResourceId};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Layer {
    Embedded,
    SubPolicy,
    Direct,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    Route,
    Rule,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Contribution {
    pub layer: Layer,
    pub scope: Scope,
    /// Creation time of the source policy, in seconds since the epoch.
    pub created_at: Option<i64>,
    pub policy: ResourceId,
    pub filters: BTreeMap<String, Value>,
}

/// The effective plugin set for one virtual host or rule.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergedPlugins {
    pub filters: BTreeMap<String, Value>,
    pub contributors: BTreeSet<ResourceId>,
}

// === impl Contribution ===

impl Contribution {
    fn precedence(&self) -> (Layer, Option<i64>, &ResourceId, Scope) {
        (self.layer, self.created_at, &self.policy, self.scope)
    }
}

pub fn merge<'c>(contributions: impl IntoIterator<Item = &'c Contribution>) -> MergedPlugins {
    let mut contributions = contributions.into_iter().collect::<Vec<_>>();
    contributions.sort_by(|a, b| a.precedence().cmp(&b.precedence()));

    let mut merged = MergedPlugins::default();
    for contribution in contributions {
        if contribution.filters.is_empty() {
            continue;
        }
        merged.contributors.insert(contribution.policy.clone());
        for (name, config) in &contribution.filters {
            merged.filters.insert(name.clone(), config.clone());
        }
    }
    merged
}

// === impl MergedPlugins ===

impl MergedPlugins {
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Returns the plugins in filter chain order.
    pub fn ordered<'a>(&'a self, registry: &Registry) -> Vec<(&'a str, &'a Value)> {
        let mut plugins = self
            .filters
            .iter()
            .map(|(name, config)| (name.as_str(), config))
            .collect::<Vec<_>>();
        plugins.sort_by_key(|(name, _)| (registry.order(name), *name));
        plugins
    }
}
