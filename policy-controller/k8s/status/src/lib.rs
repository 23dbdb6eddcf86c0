//! Reconciles translated policy state with the cluster.
//!
//! Each pass reads every input through a [`Store`], translates it, plans the
//! EnvoyFilter writes that converge the cluster on the result and publishes
//! each policy's `Accepted` condition. Passes are level-triggered: any change
//! causes a full recomputation, so a pass that fails is simply retried.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod conditions;
mod controller;
pub mod diff;
mod metrics;
mod reconcile;
mod store;

#[cfg(test)]
mod tests;

pub use self::{
    conditions::{condition, eq_time_insensitive, make_patch, CONDITION_ACCEPTED},
    controller::{Controller, Trigger},
    metrics::ControllerMetrics,
    reconcile::{PassSummary, Reconciler},
    store::{Store, StoreError},
};
