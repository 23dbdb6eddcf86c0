use crate::{
    attachment, embedded, envoy,
    route::Route,
    route_index::{RouteIndex, RouteKey},
    target::{self, Resolution},
    validation, ClusterInfo, Snapshot,
};
use ahash::AHashMap as HashMap;
use htnn_policy_controller_core::{
    merge::{self, Contribution, Layer, MergedPlugins, Scope},
    plugin::Registry,
    ResourceId, VirtualHostKey,
};
use htnn_policy_controller_k8s_api::{
    istio::{ConfigPatch, EnvoyFilter},
    policy::HttpFilterPolicy,
    ResourceExt, Time,
};
use std::collections::{BTreeMap, BTreeSet};

/// Translates a snapshot of the cluster into EnvoyFilters and policy states.
#[derive(Clone, Debug)]
pub struct Translator {
    registry: Registry,
    cluster: ClusterInfo,
}

/// The desired state derived from a snapshot.
#[derive(Clone, Debug, Default)]
pub struct Translation {
    /// The global object first, then per-host objects ordered by namespace and
    /// name.
    pub envoy_filters: Vec<EnvoyFilter>,
    pub policies: BTreeMap<ResourceId, PolicyStatus>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyStatus {
    pub generation: Option<i64>,
    pub state: PolicyState,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyState {
    Accepted,
    Invalid(String),
    TargetNotFound(String),
}

#[derive(Debug, Default)]
struct RouteContributions {
    route_wide: Vec<Contribution>,
    rules: BTreeMap<String, Vec<Contribution>>,
}

/// Identifies one route patch: a virtual host, optionally narrowed to a rule.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct PatchKey {
    vhost: VirtualHostKey,
    rule: Option<String>,
}

// === impl Translator ===

impl Translator {
    pub fn new(registry: Registry, cluster: ClusterInfo) -> Self {
        Self { registry, cluster }
    }

    pub fn translate(&self, snapshot: &Snapshot) -> Translation {
        self.translate_index(&RouteIndex::build(snapshot))
    }

    /// Translates the snapshot an index was built from.
    pub fn translate_index(&self, index: &RouteIndex<'_>) -> Translation {
        let vhosts = index
            .routes()
            .map(|(key, route)| {
                let vhosts = attachment::virtual_hosts(route, index, &self.cluster);
                (key.clone(), vhosts)
            })
            .collect::<HashMap<_, _>>();

        let mut contributions = BTreeMap::<RouteKey, RouteContributions>::new();
        for (key, route) in index.routes() {
            self.add_embedded(route, contributions.entry(key.clone()).or_default());
        }

        // Policies that resolved to a reachable route, pending confirmation that
        // they contributed to an emitted patch.
        let mut reachable = Vec::new();
        let mut policies = BTreeMap::new();
        for (id, policy) in index.policies() {
            let state = match self.resolve(policy, index, &vhosts) {
                Ok((route, section_name)) => {
                    let entry = contributions.entry(route.clone()).or_default();
                    add_direct(id, policy, section_name.as_deref(), index.route(&route), entry);
                    reachable.push(id.clone());
                    PolicyState::Accepted
                }
                Err(state) => state,
            };
            let status = PolicyStatus {
                generation: policy.metadata.generation,
                state,
            };
            policies.insert(id.clone(), status);
        }

        // Merge contributions per (namespace, object name), then per patch.
        // Hostnames that normalize to the same name share one object.
        let mut hosts =
            BTreeMap::<(String, String), BTreeMap<PatchKey, Vec<&Contribution>>>::new();
        for (route, contribs) in &contributions {
            let Some(route_vhosts) = vhosts.get(route) else {
                continue;
            };
            for vhost in route_vhosts {
                let patches = hosts
                    .entry((
                        route.id.namespace.clone(),
                        envoy::host_filter_name(&vhost.hostname),
                    ))
                    .or_default();
                if !contribs.route_wide.is_empty() {
                    patches
                        .entry(PatchKey {
                            vhost: vhost.clone(),
                            rule: None,
                        })
                        .or_default()
                        .extend(&contribs.route_wide);
                }
                for (rule, rule_contribs) in &contribs.rules {
                    patches
                        .entry(PatchKey {
                            vhost: vhost.clone(),
                            rule: Some(rule.clone()),
                        })
                        .or_default()
                        .extend(contribs.route_wide.iter().chain(rule_contribs));
                }
            }
        }

        let mut envoy_filters = vec![envoy::global_filter(&self.cluster)];
        let mut contributors = BTreeSet::new();
        for ((namespace, name), patches) in hosts {
            let mut host_contributors = BTreeSet::new();
            let config_patches = patches
                .into_iter()
                .filter_map(|(key, contribs)| {
                    let merged = merge::merge(contribs);
                    if merged.is_empty() {
                        return None;
                    }
                    host_contributors.extend(merged.contributors.iter().cloned());
                    Some(self.route_patch(&key, &merged))
                })
                .collect::<Vec<_>>();
            if config_patches.is_empty() {
                continue;
            }
            tracing::trace!(%namespace, %name, patches = config_patches.len(), "Synthesized");
            envoy_filters.push(envoy::host_filter(
                &namespace,
                name,
                config_patches,
                &host_contributors,
            ));
            contributors.extend(host_contributors);
        }

        for id in reachable {
            if contributors.contains(&id) {
                continue;
            }
            if let Some(status) = policies.get_mut(&id) {
                status.state = PolicyState::TargetNotFound(
                    "no virtual host is configured by the policy".to_string(),
                );
            }
        }

        Translation {
            envoy_filters,
            policies,
        }
    }

    fn route_patch(&self, key: &PatchKey, merged: &MergedPlugins) -> ConfigPatch {
        envoy::route_patch(&key.vhost, key.rule.as_deref(), merged, &self.registry)
    }

    /// Checks a policy and resolves it to a route that is served somewhere.
    fn resolve(
        &self,
        policy: &HttpFilterPolicy,
        index: &RouteIndex<'_>,
        vhosts: &HashMap<RouteKey, BTreeSet<VirtualHostKey>>,
    ) -> Result<(RouteKey, Option<String>), PolicyState> {
        validation::validate_spec(&policy.spec, &self.registry)
            .map_err(|error| PolicyState::Invalid(error.to_string()))?;

        match target::resolve(policy, index) {
            Resolution::Resolved {
                route,
                section_name,
            } => {
                if vhosts.get(&route).map_or(true, BTreeSet::is_empty) {
                    return Err(PolicyState::TargetNotFound(unserved(&route, index)));
                }
                Ok((route, section_name))
            }
            Resolution::NotFound(error) => Err(PolicyState::TargetNotFound(error.to_string())),
            Resolution::Invalid(error) => Err(PolicyState::Invalid(error.to_string())),
        }
    }

    fn add_embedded(&self, route: Route<'_>, contribs: &mut RouteContributions) {
        let policy = match embedded::parse(route, &self.registry) {
            Ok(Some(policy)) => policy,
            Ok(None) => return,
            Err(error) => {
                tracing::warn!(
                    route = %route.id(),
                    kind = route.kind().as_str(),
                    %error,
                    "Ignoring embedded policy"
                );
                return;
            }
        };

        let created_at = created_at(route.creation_timestamp());
        contribs.route_wide.push(Contribution {
            layer: Layer::Embedded,
            scope: Scope::Route,
            created_at,
            policy: policy.id.clone(),
            filters: policy.spec.plugin_configs(),
        });
        for sub in &policy.spec.sub_policies {
            if !route.has_rule(&sub.section_name) {
                continue;
            }
            contribs
                .rules
                .entry(sub.section_name.clone())
                .or_default()
                .push(Contribution {
                    layer: Layer::Embedded,
                    scope: Scope::Rule,
                    created_at,
                    policy: policy.id.clone(),
                    filters: sub.plugin_configs(),
                });
        }
    }
}

fn add_direct(
    id: &ResourceId,
    policy: &HttpFilterPolicy,
    section_name: Option<&str>,
    route: Option<Route<'_>>,
    contribs: &mut RouteContributions,
) {
    let created_at = created_at(policy.creation_timestamp());
    let contribution = |layer, scope, filters| Contribution {
        layer,
        scope,
        created_at,
        policy: id.clone(),
        filters,
    };

    let filters = policy.spec.plugin_configs();
    match section_name {
        Some(rule) => contribs
            .rules
            .entry(rule.to_string())
            .or_default()
            .push(contribution(Layer::Direct, Scope::Rule, filters)),
        None => contribs
            .route_wide
            .push(contribution(Layer::Direct, Scope::Route, filters)),
    }

    for sub in &policy.spec.sub_policies {
        if !route.is_some_and(|r| r.has_rule(&sub.section_name)) {
            tracing::debug!(policy = %id, rule = %sub.section_name, "Sub-policy rule not found");
            continue;
        }
        contribs
            .rules
            .entry(sub.section_name.clone())
            .or_default()
            .push(contribution(
                Layer::SubPolicy,
                Scope::Rule,
                sub.plugin_configs(),
            ));
    }
}

/// Describes why a route has no virtual hosts, naming the gateways it
/// references that do not exist.
fn unserved(route: &RouteKey, index: &RouteIndex<'_>) -> String {
    let missing = index
        .gateways_for(route)
        .filter(|gateway| index.gateway(gateway).is_none())
        .map(|gateway| gateway.id.to_string())
        .collect::<Vec<_>>();
    let message = format!("{} {} is not served by any gateway", route.kind.as_str(), route.id);
    if missing.is_empty() {
        return message;
    }
    format!("{message}: gateway {} not found", missing.join(", "))
}

fn created_at(time: Option<Time>) -> Option<i64> {
    time.map(|t| t.0.timestamp())
}
