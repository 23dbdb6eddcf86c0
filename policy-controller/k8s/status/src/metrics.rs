use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{
        counter::Counter,
        family::Family,
        histogram::{exponential_buckets, Histogram},
    },
    registry::Registry,
};

#[derive(Clone, Debug)]
pub struct ControllerMetrics {
    passes: Family<PassLabels, Counter>,
    pass_duration: Histogram,
    writes: Family<WriteLabels, Counter>,
    status_patches: Counter,
    conflicts: Counter,
    affected_policies: Counter,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PassLabels {
    result: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct WriteLabels {
    op: &'static str,
}

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let passes = Family::default();
        prom.register(
            "passes",
            "Count of reconciliation passes by result",
            passes.clone(),
        );

        let pass_duration = Histogram::new(exponential_buckets(0.001, 2.0, 14));
        prom.register(
            "pass_duration_seconds",
            "Time taken by reconciliation passes",
            pass_duration.clone(),
        );

        let writes = Family::default();
        prom.register(
            "envoy_filter_writes",
            "Count of EnvoyFilter writes by operation",
            writes.clone(),
        );

        let status_patches = Counter::default();
        prom.register(
            "status_patches",
            "Count of HTTPFilterPolicy status patches",
            status_patches.clone(),
        );

        let conflicts = Counter::default();
        prom.register(
            "write_conflicts",
            "Count of EnvoyFilter writes retried after a conflict",
            conflicts.clone(),
        );

        let affected_policies = Counter::default();
        prom.register(
            "affected_policies",
            "Count of policies named by the changes that triggered passes",
            affected_policies.clone(),
        );

        Self {
            passes,
            pass_duration,
            writes,
            status_patches,
            conflicts,
            affected_policies,
        }
    }

    pub(crate) fn pass(&self, result: &'static str, elapsed: std::time::Duration) {
        self.passes.get_or_create(&PassLabels { result }).inc();
        self.pass_duration.observe(elapsed.as_secs_f64());
    }

    pub(crate) fn write(&self, op: &'static str) {
        self.writes.get_or_create(&WriteLabels { op }).inc();
    }

    pub(crate) fn status_patch(&self) {
        self.status_patches.inc();
    }

    pub(crate) fn conflict(&self) {
        self.conflicts.inc();
    }

    pub(crate) fn affected(&self, policies: usize) {
        self.affected_policies.inc_by(policies as u64);
    }
}

#[cfg(test)]
impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}
