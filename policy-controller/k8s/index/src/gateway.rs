use htnn_policy_controller_core::{hostname, ResourceId};
use htnn_policy_controller_k8s_api::{
    gateway::{self, GatewayListenersAllowedRoutesNamespacesFrom as NamespacesFrom},
    istio,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GatewayKind {
    Istio,
    Gateway,
}

/// A gateway, either an Istio Gateway or a Gateway API Gateway.
#[derive(Copy, Clone, Debug)]
pub enum GatewayRef<'a> {
    Istio(&'a istio::Gateway),
    Gateway(&'a gateway::Gateway),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Listener {
    pub name: Option<String>,
    pub port: u16,
    pub hosts: Vec<HostRule>,
}

/// A hostname pattern a listener admits, optionally claimable only by routes
/// in one namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostRule {
    pub namespace: Option<String>,
    pub pattern: String,
}

// === impl GatewayRef ===

impl<'a> GatewayRef<'a> {
    pub fn kind(&self) -> GatewayKind {
        match self {
            Self::Istio(_) => GatewayKind::Istio,
            Self::Gateway(_) => GatewayKind::Gateway,
        }
    }

    pub fn id(&self) -> ResourceId {
        let meta = match self {
            Self::Istio(gw) => &gw.metadata,
            Self::Gateway(gw) => &gw.metadata,
        };
        ResourceId::new(
            meta.namespace.as_deref().unwrap_or_default(),
            meta.name.as_deref().unwrap_or_default(),
        )
    }

    pub fn listeners(&self) -> Vec<Listener> {
        let ns = self.id().namespace;
        match self {
            Self::Istio(gw) => gw
                .spec
                .servers
                .iter()
                .filter_map(|server| {
                    let port = u16::try_from(server.port.number).ok()?;
                    Some(Listener {
                        name: server.port.name.clone(),
                        port,
                        hosts: server.hosts.iter().map(|h| HostRule::parse(h, &ns)).collect(),
                    })
                })
                .collect(),

            Self::Gateway(gw) => gw
                .spec
                .listeners
                .iter()
                .filter_map(|listener| {
                    let port = u16::try_from(listener.port).ok()?;
                    let from = listener
                        .allowed_routes
                        .as_ref()
                        .and_then(|allowed| allowed.namespaces.as_ref())
                        .and_then(|namespaces| namespaces.from.as_ref());
                    // Routes are admitted from the gateway's own namespace
                    // unless stated otherwise.
                    let namespace = match from {
                        None | Some(NamespacesFrom::Same) => Some(ns.clone()),
                        Some(_) => None,
                    };
                    Some(Listener {
                        name: Some(listener.name.clone()),
                        port,
                        hosts: vec![HostRule {
                            namespace,
                            pattern: listener.hostname.clone().unwrap_or_else(|| "*".to_string()),
                        }],
                    })
                })
                .collect(),
        }
    }
}

// === impl Listener ===

impl Listener {
    /// Returns the hostname under which the listener serves a route host, if
    /// admitted. A wildcard route host narrows to the listener's pattern.
    pub fn admit(&self, route_ns: &str, host: &str) -> Option<String> {
        self.hosts.iter().find_map(|rule| rule.admit(route_ns, host))
    }
}

// === impl HostRule ===

impl HostRule {
    /// Parses an Istio server host: `host`, `ns/host`, `./host` or `*/host`.
    fn parse(host: &str, gateway_ns: &str) -> Self {
        match host.split_once('/') {
            Some(("*", pattern)) => Self {
                namespace: None,
                pattern: pattern.to_string(),
            },
            Some((".", pattern)) => Self {
                namespace: Some(gateway_ns.to_string()),
                pattern: pattern.to_string(),
            },
            Some((ns, pattern)) => Self {
                namespace: Some(ns.to_string()),
                pattern: pattern.to_string(),
            },
            None => Self {
                namespace: None,
                pattern: host.to_string(),
            },
        }
    }

    fn admit(&self, route_ns: &str, host: &str) -> Option<String> {
        if let Some(ns) = self.namespace.as_deref() {
            if ns != route_ns {
                return None;
            }
        }
        if hostname::matches(&self.pattern, host) {
            return Some(host.to_string());
        }
        // A route that serves any host takes the listener's hostname.
        if host == "*" {
            return Some(self.pattern.clone());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_istio_hosts() {
        assert_eq!(
            HostRule::parse("default.local", "istio-system"),
            HostRule {
                namespace: None,
                pattern: "default.local".to_string()
            }
        );
        assert_eq!(
            HostRule::parse("other-ns/default.local", "istio-system"),
            HostRule {
                namespace: Some("other-ns".to_string()),
                pattern: "default.local".to_string()
            }
        );
        assert_eq!(
            HostRule::parse("./default.local", "istio-system"),
            HostRule {
                namespace: Some("istio-system".to_string()),
                pattern: "default.local".to_string()
            }
        );
        assert_eq!(
            HostRule::parse("*/*.local", "istio-system").namespace,
            None
        );
    }

    #[test]
    fn namespace_restricted_hosts() {
        let rule = HostRule::parse("other-ns/default.local", "istio-system");
        assert_eq!(rule.admit("default", "default.local"), None);
        assert_eq!(
            rule.admit("other-ns", "default.local").as_deref(),
            Some("default.local")
        );
    }

    #[test]
    fn any_host_route_takes_listener_hostname() {
        let rule = HostRule {
            namespace: None,
            pattern: "default.local".to_string(),
        };
        assert_eq!(rule.admit("default", "*").as_deref(), Some("default.local"));
    }
}
