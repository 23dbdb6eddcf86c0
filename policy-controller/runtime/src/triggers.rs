use crate::{
    core::ResourceId,
    index::ObjectKind,
    k8s::{
        gateway::{Gateway, HTTPRoute},
        istio::{self, EnvoyFilter, VirtualService},
        policy::HttpFilterPolicy,
        Resource, ResourceExt,
    },
    status::Trigger,
};
use ahash::AHashMap as HashMap;
use kubert::index::IndexNamespacedResource;
use parking_lot::RwLock;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

pub type SharedTriggers = Arc<RwLock<Triggers>>;

/// Turns watch events into controller triggers.
///
/// Every watched kind feeds the same index. The index keeps only the last seen
/// resource version of each object, so resyncs that replay unchanged objects do
/// not wake the controller.
pub struct Triggers {
    tx: mpsc::Sender<Trigger>,
    versions: HashMap<(ObjectKind, ResourceId), String>,
    metrics: TriggerMetrics,
}

/// A kind whose changes trigger a pass.
pub trait Watched: Resource<DynamicType = ()> {
    const KIND: ObjectKind;
}

#[derive(Clone, Debug)]
pub struct TriggerMetrics {
    applies: Family<KindLabels, Counter>,
    deletes: Family<KindLabels, Counter>,
    unchanged: Family<KindLabels, Counter>,
    overflows: Counter,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: &'static str,
}

// === impl Triggers ===

impl Triggers {
    pub fn shared(tx: mpsc::Sender<Trigger>, metrics: TriggerMetrics) -> SharedTriggers {
        Arc::new(RwLock::new(Self {
            tx,
            versions: HashMap::default(),
            metrics,
        }))
    }

    fn send(&mut self, kind: ObjectKind, id: ResourceId) {
        match self.tx.try_send(Trigger { kind, id }) {
            Ok(()) => {}
            // A full queue already guarantees a pass that reads every object.
            Err(TrySendError::Full(trigger)) => {
                tracing::debug!(kind = kind.as_str(), id = %trigger.id, "Trigger queue full");
                self.metrics.overflows.inc();
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(kind = kind.as_str(), "Controller stopped; dropping trigger");
            }
        }
    }
}

impl<T> IndexNamespacedResource<T> for Triggers
where
    T: Watched,
{
    fn apply(&mut self, resource: T) {
        let kind = T::KIND;
        let id = ResourceId::new(resource.namespace().unwrap_or_default(), resource.name_any());
        let labels = KindLabels {
            kind: kind.as_str(),
        };

        if let Some(version) = resource.resource_version() {
            let key = (kind, id.clone());
            if self.versions.get(&key) == Some(&version) {
                self.metrics.unchanged.get_or_create(&labels).inc();
                return;
            }
            self.versions.insert(key, version);
        }

        tracing::trace!(kind = kind.as_str(), %id, "Applied");
        self.metrics.applies.get_or_create(&labels).inc();
        self.send(kind, id);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let kind = T::KIND;
        let id = ResourceId::new(namespace, name);
        self.versions.remove(&(kind, id.clone()));

        tracing::trace!(kind = kind.as_str(), %id, "Deleted");
        self.metrics
            .deletes
            .get_or_create(&KindLabels {
                kind: kind.as_str(),
            })
            .inc();
        self.send(kind, id);
    }
}

// === impl TriggerMetrics ===

impl TriggerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let applies = Family::default();
        prom.register(
            "applies",
            "Count of watched objects applied",
            applies.clone(),
        );

        let deletes = Family::default();
        prom.register(
            "deletes",
            "Count of watched objects deleted",
            deletes.clone(),
        );

        let unchanged = Family::default();
        prom.register(
            "unchanged",
            "Count of watch events ignored because the resource version was already seen",
            unchanged.clone(),
        );

        let overflows = Counter::default();
        prom.register(
            "overflows",
            "Count of triggers dropped because the queue was full",
            overflows.clone(),
        );

        Self {
            applies,
            deletes,
            unchanged,
            overflows,
        }
    }
}

// === impl Watched ===

impl Watched for HttpFilterPolicy {
    const KIND: ObjectKind = ObjectKind::HttpFilterPolicy;
}

impl Watched for VirtualService {
    const KIND: ObjectKind = ObjectKind::VirtualService;
}

impl Watched for HTTPRoute {
    const KIND: ObjectKind = ObjectKind::HttpRoute;
}

impl Watched for istio::Gateway {
    const KIND: ObjectKind = ObjectKind::IstioGateway;
}

impl Watched for Gateway {
    const KIND: ObjectKind = ObjectKind::Gateway;
}

impl Watched for EnvoyFilter {
    const KIND: ObjectKind = ObjectKind::EnvoyFilter;
}
