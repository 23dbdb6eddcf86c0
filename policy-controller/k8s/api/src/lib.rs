#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod gateway;
pub mod istio;
pub mod policy;

pub use k8s_openapi::{
    api,
    apimachinery::{
        self,
        pkg::apis::meta::v1::{Condition, Time},
    },
};
pub use kube::{
    api::{
        Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams, Resource,
        ResourceExt,
    },
    core::ErrorResponse,
    runtime::watcher,
    Client, Error,
};

/// Annotation on a route holding a policy embedded in the route itself.
pub const EMBEDDED_POLICY_ANNOTATION: &str = "htnn.mosn.io/httpfilterpolicy";

/// Annotation on a generated EnvoyFilter naming the policies it was built from.
pub const INFO_ANNOTATION: &str = "htnn.mosn.io/info";
