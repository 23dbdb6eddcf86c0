/// Holds cluster metadata.
#[derive(Clone, Debug)]
pub struct ClusterInfo {
    /// The namespace holding mesh-wide Istio configuration. The global
    /// EnvoyFilter is written here.
    pub istio_root_namespace: String,

    /// The port under which mesh-bound routes are served by sidecars.
    pub mesh_port: u16,
}

impl Default for ClusterInfo {
    fn default() -> Self {
        Self {
            istio_root_namespace: "istio-system".to_string(),
            mesh_port: 80,
        }
    }
}
