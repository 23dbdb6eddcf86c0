//! Kubernetes Gateway API types consumed by the controller.

pub use gateway_api::apis::experimental::{
    gateways::{
        Gateway, GatewayListeners, GatewayListenersAllowedRoutes,
        GatewayListenersAllowedRoutesNamespaces, GatewayListenersAllowedRoutesNamespacesFrom,
        GatewaySpec,
    },
    httproutes::{HTTPRoute, HTTPRouteParentRefs, HTTPRouteRules, HTTPRouteSpec},
};

/// The API group of Gateway API resources.
pub const GROUP: &str = "gateway.networking.k8s.io";
