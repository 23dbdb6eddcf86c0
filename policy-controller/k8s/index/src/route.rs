use htnn_policy_controller_core::ResourceId;
use htnn_policy_controller_k8s_api::{
    gateway::{self, HTTPRoute},
    istio::VirtualService,
    ResourceExt, Time,
};
use std::collections::BTreeMap;

/// The gateway name that binds a VirtualService to every sidecar.
const MESH: &str = "mesh";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteKind {
    VirtualService,
    HttpRoute,
}

/// A routing object, either an Istio VirtualService or a Gateway API HTTPRoute.
#[derive(Copy, Clone, Debug)]
pub enum Route<'a> {
    Virtual(&'a VirtualService),
    Http(&'a HTTPRoute),
}

/// A route's reference to something that serves it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Binding {
    /// Served by every sidecar in the mesh.
    Mesh,
    IstioGateway(ResourceId),
    Gateway {
        id: ResourceId,
        section_name: Option<String>,
        port: Option<u16>,
    },
}

// === impl RouteKind ===

impl RouteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VirtualService => "VirtualService",
            Self::HttpRoute => "HTTPRoute",
        }
    }
}

// === impl Route ===

impl<'a> Route<'a> {
    pub fn kind(&self) -> RouteKind {
        match self {
            Self::Virtual(_) => RouteKind::VirtualService,
            Self::Http(_) => RouteKind::HttpRoute,
        }
    }

    pub fn namespace(&self) -> &'a str {
        let meta = match *self {
            Self::Virtual(vs) => &vs.metadata,
            Self::Http(hr) => &hr.metadata,
        };
        meta.namespace.as_deref().unwrap_or_default()
    }

    pub fn name(&self) -> &'a str {
        let meta = match *self {
            Self::Virtual(vs) => &vs.metadata,
            Self::Http(hr) => &hr.metadata,
        };
        meta.name.as_deref().unwrap_or_default()
    }

    pub fn id(&self) -> ResourceId {
        ResourceId::new(self.namespace(), self.name())
    }

    pub fn creation_timestamp(&self) -> Option<Time> {
        match self {
            Self::Virtual(vs) => vs.creation_timestamp(),
            Self::Http(hr) => hr.creation_timestamp(),
        }
    }

    pub fn annotations(&self) -> &'a BTreeMap<String, String> {
        match *self {
            Self::Virtual(vs) => vs.annotations(),
            Self::Http(hr) => hr.annotations(),
        }
    }

    /// The hostnames the route serves. An HTTPRoute without hostnames serves
    /// whatever its listeners admit, represented as `*`.
    pub fn hostnames(&self) -> Vec<&'a str> {
        match *self {
            Self::Virtual(vs) => vs.spec.hosts.iter().map(String::as_str).collect(),
            Self::Http(hr) => match hr.spec.hostnames.as_deref() {
                Some(hosts) if !hosts.is_empty() => hosts.iter().map(String::as_str).collect(),
                _ => vec!["*"],
            },
        }
    }

    /// Names of the route's rules. Unnamed rules cannot be targeted and are
    /// omitted.
    pub fn rule_names(&self) -> Vec<&'a str> {
        match *self {
            Self::Virtual(vs) => vs.spec.http.iter().filter_map(|r| r.name.as_deref()).collect(),
            Self::Http(hr) => hr
                .spec
                .rules
                .iter()
                .flatten()
                .filter_map(|r| r.name.as_deref())
                .collect(),
        }
    }

    pub fn has_rule(&self, name: &str) -> bool {
        self.rule_names().contains(&name)
    }

    pub fn bindings(&self) -> Vec<Binding> {
        match self {
            Self::Virtual(vs) => virtual_service_bindings(vs, self.namespace()),
            Self::Http(hr) => http_route_bindings(hr, self.namespace()),
        }
    }
}

fn virtual_service_bindings(vs: &VirtualService, ns: &str) -> Vec<Binding> {
    if vs.spec.gateways.is_empty() {
        return vec![Binding::Mesh];
    }

    vs.spec
        .gateways
        .iter()
        .map(|gw| {
            if gw == MESH {
                return Binding::Mesh;
            }
            match gw.split_once('/') {
                Some((gw_ns, name)) => Binding::IstioGateway(ResourceId::new(gw_ns, name)),
                None => Binding::IstioGateway(ResourceId::new(ns, gw)),
            }
        })
        .collect()
}

fn http_route_bindings(hr: &HTTPRoute, ns: &str) -> Vec<Binding> {
    hr.spec
        .parent_refs
        .iter()
        .flatten()
        .filter(|parent| {
            let group = parent.group.as_deref().unwrap_or(gateway::GROUP);
            let kind = parent.kind.as_deref().unwrap_or("Gateway");
            group == gateway::GROUP && kind == "Gateway"
        })
        .map(|parent| Binding::Gateway {
            id: ResourceId::new(parent.namespace.as_deref().unwrap_or(ns), &parent.name),
            section_name: parent.section_name.clone(),
            port: parent.port.and_then(|p| u16::try_from(p).ok()),
        })
        .collect()
}
