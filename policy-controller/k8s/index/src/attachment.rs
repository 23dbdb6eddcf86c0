use crate::{
    gateway::GatewayKind,
    route::{Binding, Route},
    route_index::{GatewayKey, RouteIndex},
    ClusterInfo,
};
use htnn_policy_controller_core::VirtualHostKey;
use std::collections::BTreeSet;

/// Computes the virtual hosts under which a route is served.
///
/// Each gateway the route binds to contributes `hostname:port` for every
/// listener that admits one of the route's hostnames. A mesh binding serves
/// every route hostname on the mesh port. A route whose bindings admit
/// nothing yields an empty set.
pub fn virtual_hosts(
    route: Route<'_>,
    index: &RouteIndex<'_>,
    cluster: &ClusterInfo,
) -> BTreeSet<VirtualHostKey> {
    let ns = route.namespace();
    let hosts = route.hostnames();
    let mut keys = BTreeSet::new();

    for binding in route.bindings() {
        let (key, section_name, port) = match binding {
            Binding::Mesh => {
                keys.extend(
                    hosts
                        .iter()
                        .filter(|host| **host != "*")
                        .map(|host| VirtualHostKey::new(host, cluster.mesh_port)),
                );
                continue;
            }
            Binding::IstioGateway(id) => (GatewayKey::new(GatewayKind::Istio, id), None, None),
            Binding::Gateway {
                id,
                section_name,
                port,
            } => (GatewayKey::new(GatewayKind::Gateway, id), section_name, port),
        };

        let Some(gateway) = index.gateway(&key) else {
            tracing::debug!(gateway = %key.id, route = %route.id(), "Gateway not found");
            continue;
        };

        for listener in gateway.listeners() {
            if let Some(section) = section_name.as_deref() {
                if listener.name.as_deref() != Some(section) {
                    continue;
                }
            }
            if port.is_some_and(|p| p != listener.port) {
                continue;
            }
            for host in &hosts {
                if let Some(hostname) = listener.admit(ns, host) {
                    keys.insert(VirtualHostKey::new(hostname, listener.port));
                }
            }
        }
    }

    keys
}
