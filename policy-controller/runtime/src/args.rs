use crate::{
    core::plugin::Registry as Plugins,
    index::{ClusterInfo, Translator},
    k8s::{
        gateway::{Gateway, HTTPRoute},
        istio::{self, EnvoyFilter, VirtualService},
        policy::HttpFilterPolicy,
        watcher,
    },
    lease, status,
    store::KubeStore,
    triggers::{SharedTriggers, TriggerMetrics, Triggers, Watched},
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use tokio::{sync::mpsc, time::Duration};
use tracing::{info_span, Instrument};

// Triggers beyond this many are dropped; a queued trigger already guarantees a
// full pass.
const TRIGGER_QUEUE_SIZE: usize = 1024;

#[derive(Debug, Parser)]
#[clap(
    name = "htnn-controller",
    about = "Translates HTTPFilterPolicy resources into Istio EnvoyFilters"
)]
pub struct Args {
    #[clap(long, default_value = "htnn=info,warn", env = "HTNN_CONTROLLER_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The namespace holding Istio's mesh-wide configuration. The global
    /// EnvoyFilter is written here.
    #[clap(long, default_value = "istio-system")]
    istio_root_namespace: String,

    /// The namespace of the controller's deployment and write lease.
    #[clap(long, default_value = "htnn-system")]
    controller_namespace: String,

    #[clap(long, default_value = "htnn-controller")]
    deployment_name: String,

    /// Seconds between passes when nothing changes.
    #[clap(long, default_value = "10")]
    resync_period_secs: u64,

    /// The port of virtual hosts for routes bound to the mesh.
    #[clap(long, default_value = "80")]
    mesh_port: u16,

    /// Bounds the time taken by a single pass, including its writes.
    #[clap(long, default_value = "5000")]
    pass_timeout_ms: u64,

    /// How long a claim on the write lease lasts without being renewed.
    #[clap(long, default_value = "30")]
    lease_duration_secs: u64,

    #[clap(long, default_value = "1")]
    lease_renew_grace_secs: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            istio_root_namespace,
            controller_namespace,
            deployment_name,
            resync_period_secs,
            mesh_port,
            pass_timeout_ms,
            lease_duration_secs,
            lease_renew_grace_secs,
        } = self;

        if resync_period_secs == 0 {
            bail!("--resync-period-secs must be positive");
        }
        if lease_renew_grace_secs >= lease_duration_secs {
            bail!("--lease-renew-grace-secs must be less than --lease-duration-secs");
        }

        let mut prom = <Registry>::default();
        let controller_metrics =
            status::ControllerMetrics::register(prom.sub_registry_with_prefix("controller"));
        let trigger_metrics = TriggerMetrics::register(prom.sub_registry_with_prefix("triggers"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let hostname = std::env::var("HOSTNAME")
            .context("Failed to fetch `HOSTNAME` environment variable")?;

        let claims = lease::init(
            &runtime,
            &controller_namespace,
            &deployment_name,
            &hostname,
            lease::LeaseParams {
                duration: Duration::from_secs(lease_duration_secs),
                renew_grace_period: Duration::from_secs(lease_renew_grace_secs),
            },
        )
        .await?;

        let store = KubeStore::discover(runtime.client()).await?;
        let kinds = store.kinds();

        // Spawn resource watches. Every watch feeds the same trigger index.
        let (triggers_tx, triggers_rx) = mpsc::channel(TRIGGER_QUEUE_SIZE);
        let triggers = Triggers::shared(triggers_tx, trigger_metrics);

        watch::<HttpFilterPolicy, _>(&mut runtime, &triggers, "httpfilterpolicies");
        watch::<EnvoyFilter, _>(&mut runtime, &triggers, "envoyfilters");
        if kinds.virtual_services {
            watch::<VirtualService, _>(&mut runtime, &triggers, "virtualservices");
        } else {
            tracing::warn!(
                "virtualservices.{} resource kind not found, skipping watches",
                istio::GROUP
            );
        }
        if kinds.istio_gateways {
            watch::<istio::Gateway, _>(&mut runtime, &triggers, "gateways.networking.istio.io");
        } else {
            tracing::warn!("gateways.{} resource kind not found, skipping watches", istio::GROUP);
        }
        if kinds.http_routes {
            watch::<HTTPRoute, _>(&mut runtime, &triggers, "httproutes");
        } else {
            tracing::warn!(
                "httproutes.gateway.networking.k8s.io resource kind not found, skipping watches"
            );
        }
        if kinds.gateways {
            watch::<Gateway, _>(&mut runtime, &triggers, "gateways.gateway.networking.k8s.io");
        } else {
            tracing::warn!(
                "gateways.gateway.networking.k8s.io resource kind not found, skipping watches"
            );
        }

        // Spawn the controller. It only writes while it holds the lease.
        let cluster = ClusterInfo {
            istio_root_namespace,
            mesh_port,
        };
        let reconciler = status::Reconciler::new(
            store,
            Translator::new(Plugins::with_builtins(), cluster),
            controller_metrics,
        );
        let controller = status::Controller::new(
            claims,
            hostname,
            reconciler,
            triggers_rx,
            Duration::from_secs(resync_period_secs),
            Duration::from_millis(pass_timeout_ms),
        );
        tokio::spawn(controller.run().instrument(info_span!("controller")));

        // Block the main thread on the shutdown signal. Once it fires, wait for
        // the background tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

fn watch<T, S: 'static>(runtime: &mut kubert::Runtime<S>, triggers: &SharedTriggers, kind: &'static str)
where
    T: Watched + Clone + std::fmt::Debug + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    let events = runtime.watch_all::<T>(watcher::Config::default());
    tokio::spawn(
        kubert::index::namespaced(triggers.clone(), events).instrument(info_span!("watch", kind)),
    );
}
