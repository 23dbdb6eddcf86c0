//! Reverse lookups between policies, routes and gateways.
//!
//! The index is derived from a [`Snapshot`] and rebuilt for every pass. Keys
//! are identifiers, not live objects, so an index built before an object was
//! deleted still answers which policies the deletion affects.

use crate::{
    gateway::{GatewayKind, GatewayRef},
    route::{Binding, Route, RouteKind},
    target, Snapshot,
};
use ahash::AHashMap as HashMap;
use htnn_policy_controller_core::ResourceId;
use htnn_policy_controller_k8s_api::{policy::HttpFilterPolicy, ResourceExt};
use std::collections::{BTreeMap, BTreeSet};

/// Kinds of objects whose changes trigger a pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    HttpFilterPolicy,
    VirtualService,
    HttpRoute,
    IstioGateway,
    Gateway,
    EnvoyFilter,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey {
    pub kind: RouteKind,
    pub id: ResourceId,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GatewayKey {
    pub kind: GatewayKind,
    pub id: ResourceId,
}

#[derive(Debug, Default)]
pub struct RouteIndex<'a> {
    routes: BTreeMap<RouteKey, Route<'a>>,
    gateways: HashMap<GatewayKey, GatewayRef<'a>>,
    policies: BTreeMap<ResourceId, &'a HttpFilterPolicy>,

    policy_targets: HashMap<ResourceId, RouteKey>,
    route_policies: HashMap<RouteKey, BTreeSet<ResourceId>>,
    route_gateways: HashMap<RouteKey, BTreeSet<GatewayKey>>,
    gateway_routes: HashMap<GatewayKey, BTreeSet<RouteKey>>,
}

// === impl ObjectKind ===

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HttpFilterPolicy => "HTTPFilterPolicy",
            Self::VirtualService => "VirtualService",
            Self::HttpRoute => "HTTPRoute",
            Self::IstioGateway => "Gateway.networking.istio.io",
            Self::Gateway => "Gateway.gateway.networking.k8s.io",
            Self::EnvoyFilter => "EnvoyFilter",
        }
    }
}

// === impl RouteKey ===

impl RouteKey {
    pub fn new(kind: RouteKind, id: ResourceId) -> Self {
        Self { kind, id }
    }
}

// === impl GatewayKey ===

impl GatewayKey {
    pub fn new(kind: GatewayKind, id: ResourceId) -> Self {
        Self { kind, id }
    }
}

// === impl RouteIndex ===

impl<'a> RouteIndex<'a> {
    pub fn build(snapshot: &'a Snapshot) -> Self {
        let mut index = Self::default();

        let routes = snapshot
            .virtual_services
            .iter()
            .map(Route::Virtual)
            .chain(snapshot.http_routes.iter().map(Route::Http));
        for route in routes {
            index.add_route(route);
        }

        let gateways = snapshot
            .istio_gateways
            .iter()
            .map(GatewayRef::Istio)
            .chain(snapshot.gateways.iter().map(GatewayRef::Gateway));
        for gateway in gateways {
            index
                .gateways
                .insert(GatewayKey::new(gateway.kind(), gateway.id()), gateway);
        }

        for policy in &snapshot.policies {
            let id = ResourceId::new(policy.namespace().unwrap_or_default(), policy.name_any());
            if let Ok(route) = target::route_key(policy) {
                index
                    .route_policies
                    .entry(route.clone())
                    .or_default()
                    .insert(id.clone());
                index.policy_targets.insert(id.clone(), route);
            }
            index.policies.insert(id, policy);
        }

        index
    }

    fn add_route(&mut self, route: Route<'a>) {
        let key = RouteKey::new(route.kind(), route.id());
        for binding in route.bindings() {
            let gateway = match binding {
                Binding::Mesh => continue,
                Binding::IstioGateway(id) => GatewayKey::new(GatewayKind::Istio, id),
                Binding::Gateway { id, .. } => GatewayKey::new(GatewayKind::Gateway, id),
            };
            self.gateway_routes
                .entry(gateway.clone())
                .or_default()
                .insert(key.clone());
            self.route_gateways
                .entry(key.clone())
                .or_default()
                .insert(gateway);
        }
        self.routes.insert(key, route);
    }

    pub fn routes(&self) -> impl Iterator<Item = (&RouteKey, Route<'a>)> + '_ {
        self.routes.iter().map(|(key, route)| (key, *route))
    }

    pub fn route(&self, key: &RouteKey) -> Option<Route<'a>> {
        self.routes.get(key).copied()
    }

    pub fn gateway(&self, key: &GatewayKey) -> Option<GatewayRef<'a>> {
        self.gateways.get(key).copied()
    }

    /// Policies ordered by identity.
    pub fn policies(&self) -> impl Iterator<Item = (&ResourceId, &'a HttpFilterPolicy)> + '_ {
        self.policies.iter().map(|(id, policy)| (id, *policy))
    }

    pub fn target_of(&self, policy: &ResourceId) -> Option<&RouteKey> {
        self.policy_targets.get(policy)
    }

    /// Gateways the route references, whether or not they exist.
    pub fn gateways_for(&self, route: &RouteKey) -> impl Iterator<Item = &GatewayKey> + '_ {
        self.route_gateways.get(route).into_iter().flatten()
    }

    /// Routes referencing the gateway.
    pub fn routes_for(&self, gateway: &GatewayKey) -> impl Iterator<Item = &RouteKey> + '_ {
        self.gateway_routes.get(gateway).into_iter().flatten()
    }

    /// Policies targeting the route.
    pub fn policies_for(&self, route: &RouteKey) -> impl Iterator<Item = &ResourceId> + '_ {
        self.route_policies.get(route).into_iter().flatten()
    }

    /// Returns the policies whose outcome may change when the named object
    /// changes.
    pub fn affected_policies(&self, kind: ObjectKind, id: &ResourceId) -> BTreeSet<ResourceId> {
        let route_kind = match kind {
            ObjectKind::HttpFilterPolicy => return std::iter::once(id.clone()).collect(),
            ObjectKind::EnvoyFilter => return BTreeSet::new(),
            ObjectKind::VirtualService => RouteKind::VirtualService,
            ObjectKind::HttpRoute => RouteKind::HttpRoute,
            ObjectKind::IstioGateway | ObjectKind::Gateway => {
                let gateway_kind = if kind == ObjectKind::IstioGateway {
                    GatewayKind::Istio
                } else {
                    GatewayKind::Gateway
                };
                let gateway = GatewayKey::new(gateway_kind, id.clone());
                return self
                    .routes_for(&gateway)
                    .flat_map(|route| self.policies_for(route))
                    .cloned()
                    .collect();
            }
        };
        self.policies_for(&RouteKey::new(route_kind, id.clone()))
            .cloned()
            .collect()
    }
}
