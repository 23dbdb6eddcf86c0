use htnn_policy_controller_k8s_api::{
    gateway::{Gateway, HTTPRoute},
    istio::{self, VirtualService},
    policy::HttpFilterPolicy,
};

/// A point-in-time read of every input the controller translates.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub policies: Vec<HttpFilterPolicy>,
    pub virtual_services: Vec<VirtualService>,
    pub http_routes: Vec<HTTPRoute>,
    pub istio_gateways: Vec<istio::Gateway>,
    pub gateways: Vec<Gateway>,
}
