//! HTNN Policy Index
//!
//! Translates `HTTPFilterPolicy` resources into the EnvoyFilters that configure
//! HTTP plugins in Istio gateways and sidecars. Translation is a pure function
//! of a [`Snapshot`] of the cluster:
//!
//! ```text
//! [ HTTPFilterPolicy ] -> [ VirtualService | HTTPRoute ] -> [ Gateway ] -> [ hostname:port ]
//! ```
//!
//! - A policy targets one route, or one named rule of a route, in its own
//!   namespace. Sub-policies narrow part of a policy to a named rule.
//! - A route may embed a policy in an annotation. Embedded policies have the
//!   lowest precedence and are ignored when invalid.
//! - A route is served under the `hostname:port` virtual hosts admitted by the
//!   listeners of the gateways it binds to, or on the mesh port when bound to
//!   the mesh.
//! - Contributions to each virtual host are merged and written as patches on
//!   one EnvoyFilter per hostname in the route's namespace.
//!
//! The [`RouteIndex`] holds the reverse lookups used by translation and is
//! rebuilt from every snapshot; it is never a source of truth.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod attachment;
mod cluster_info;
mod embedded;
pub mod envoy;
mod gateway;
mod route;
mod route_index;
mod snapshot;
mod target;
mod translate;
mod validation;


pub use self::{
    attachment::virtual_hosts,
    cluster_info::ClusterInfo,
    embedded::{EmbeddedError, EmbeddedPolicy},
    gateway::{GatewayKind, GatewayRef, HostRule, Listener},
    route::{Binding, Route, RouteKind},
    route_index::{GatewayKey, ObjectKind, RouteIndex, RouteKey},
    snapshot::Snapshot,
    target::{resolve, InvalidTarget, Resolution, TargetNotFound},
    translate::{PolicyState, PolicyStatus, Translation, Translator},
    validation::validate_spec,
};
