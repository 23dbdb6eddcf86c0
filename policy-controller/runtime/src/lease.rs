use crate::k8s::{
    self, api::apps::v1::Deployment, apimachinery::pkg::apis::meta::v1::OwnerReference,
    ObjectMeta, Resource,
};
use anyhow::Result;
use k8s_openapi::api::coordination::v1 as coordv1;
use std::sync::Arc;
use tokio::{sync::watch, time};

const LEASE_NAME: &str = "htnn-controller-write";
const FIELD_MANAGER: &str = "htnn-controller";

/// Timing of the write lease.
#[derive(Copy, Clone, Debug)]
pub struct LeaseParams {
    pub duration: time::Duration,
    pub renew_grace_period: time::Duration,
}

/// Ensures the write lease exists and starts competing for it. Only the
/// current holder writes EnvoyFilters and policy statuses.
pub async fn init<T>(
    runtime: &kubert::Runtime<T>,
    ns: &str,
    deployment_name: &str,
    hostname: &str,
    params: LeaseParams,
) -> Result<watch::Receiver<Arc<kubert::lease::Claim>>> {
    let deployment = k8s::Api::<Deployment>::namespaced(runtime.client(), ns)
        .get(deployment_name)
        .await?;

    let api = k8s::Api::<coordv1::Lease>::namespaced(runtime.client(), ns);
    let patch = k8s::PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    };
    let lease = write_lease(ns, deployment.controller_owner_ref(&()));
    match api
        .patch(LEASE_NAME, &patch, &k8s::Patch::Apply(lease))
        .await
    {
        Ok(lease) => tracing::info!(?lease, "Created Lease resource"),
        // Another replica created it first.
        Err(k8s::Error::Api(_)) => tracing::debug!("Lease already exists"),
        Err(error) => return Err(error.into()),
    };

    let claim = kubert::lease::ClaimParams {
        lease_duration: params.duration,
        renew_grace_period: params.renew_grace_period,
    };
    let (claims, _task) = kubert::lease::LeaseManager::init(api, LEASE_NAME)
        .await?
        .spawn(hostname, claim)
        .await?;
    tracing::info!(lease = LEASE_NAME, %hostname, "Competing for the write lease");
    Ok(claims)
}

/// The lease as first created. It is owned by the controller's deployment so
/// that it is garbage-collected with it, and a resource version of "0" only
/// creates it if it does not already exist.
fn write_lease(ns: &str, owner: Option<OwnerReference>) -> coordv1::Lease {
    coordv1::Lease {
        metadata: ObjectMeta {
            name: Some(LEASE_NAME.to_string()),
            namespace: Some(ns.to_string()),
            resource_version: Some("0".to_string()),
            owner_references: owner.map(|owner| vec![owner]),
            labels: Some(
                [(
                    "app.kubernetes.io/component".to_string(),
                    "htnn-controller".to_string(),
                )]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        },
        spec: None,
    }
}
