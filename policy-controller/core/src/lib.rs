#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod hostname;
pub mod merge;
pub mod plugin;
mod resource_id;
mod vhost;

pub use self::{resource_id::ResourceId, vhost::VirtualHostKey};

pub const POLICY_CONTROLLER_NAME: &str = "htnn.mosn.io/controller";

/// Name of the proxy's golang HTTP filter that hosts the plugin pipeline.
pub const GOLANG_FILTER_NAME: &str = "htnn.filters.http.golang";
