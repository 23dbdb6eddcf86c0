#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use htnn_policy_controller_core as core;
pub use htnn_policy_controller_k8s_api as k8s;
pub use htnn_policy_controller_k8s_index as index;
pub use htnn_policy_controller_k8s_status as status;

mod args;
mod lease;
mod store;
mod triggers;

pub use self::{
    args::Args,
    store::{KubeStore, Kinds},
    triggers::{SharedTriggers, TriggerMetrics, Triggers, Watched},
};
