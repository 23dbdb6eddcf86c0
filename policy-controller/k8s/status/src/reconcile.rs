use crate::{
    conditions::{self, condition, eq_time_insensitive},
    diff::{self, Op},
    ControllerMetrics, Store, StoreError, Trigger,
};
use chrono::Utc;
use htnn_policy_controller_core::ResourceId;
use htnn_policy_controller_k8s_api::istio::EnvoyFilter;
use htnn_policy_controller_k8s_index::{RouteIndex, Translation, Translator};
use std::collections::{BTreeMap, BTreeSet};

/// Bounds the attempts to write one object within a pass.
const MAX_ATTEMPTS: usize = 3;

pub struct Reconciler<S> {
    store: S,
    translator: Translator,
    metrics: ControllerMetrics,
}

/// The writes performed by a pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Policies whose outcome the pass's triggers may have changed.
    pub affected: usize,
    pub created: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub statuses: usize,
    pub conflicts: usize,
}

// === impl PassSummary ===

impl PassSummary {
    pub fn writes(&self) -> usize {
        self.created + self.replaced + self.deleted + self.statuses
    }
}

// === impl Reconciler ===

impl<S: Store> Reconciler<S> {
    pub fn new(store: S, translator: Translator, metrics: ControllerMetrics) -> Self {
        Self {
            store,
            translator,
            metrics,
        }
    }

    pub(crate) fn metrics(&self) -> &ControllerMetrics {
        &self.metrics
    }

    /// Recomputes all derived state from fresh reads and converges the cluster
    /// on it.
    #[tracing::instrument(skip_all, fields(triggers = triggers.len()))]
    pub async fn pass(&self, triggers: &[Trigger]) -> Result<PassSummary, StoreError> {
        let snapshot = self.store.snapshot().await?;
        let index = RouteIndex::build(&snapshot);
        let mut affected = BTreeSet::new();
        for Trigger { kind, id } in triggers {
            let policies = index.affected_policies(*kind, id);
            tracing::debug!(kind = kind.as_str(), %id, ?policies, "Changed");
            affected.extend(policies);
        }
        self.metrics.affected(affected.len());

        let translation = self.translator.translate_index(&index);
        let observed = self.store.list_envoy_filters().await?;

        let mut summary = PassSummary {
            affected: affected.len(),
            ..PassSummary::default()
        };
        let desired = translation
            .envoy_filters
            .iter()
            .map(|filter| (diff::id(filter), filter))
            .collect::<BTreeMap<_, _>>();
        for op in diff::plan(&translation.envoy_filters, &observed) {
            self.apply(op, &desired, &mut summary).await?;
        }

        self.publish(&index, &translation, &mut summary).await?;
        tracing::debug!(?summary, "Reconciled");
        Ok(summary)
    }

    /// Applies a write. When the object changed underneath us, the write is
    /// replanned against a fresh read of that object.
    async fn apply(
        &self,
        op: Op,
        desired: &BTreeMap<ResourceId, &EnvoyFilter>,
        summary: &mut PassSummary,
    ) -> Result<(), StoreError> {
        let id = op.id();
        let mut next = Some(op);
        for attempt in 1..=MAX_ATTEMPTS {
            let Some(op) = next.take() else {
                return Ok(());
            };
            match self.write(&op).await {
                Ok(()) => {
                    tracing::info!(%id, op = op.as_str(), "Wrote EnvoyFilter");
                    self.metrics.write(op.as_str());
                    match op {
                        Op::Create(_) => summary.created += 1,
                        Op::Replace(_) => summary.replaced += 1,
                        Op::Delete(_) => summary.deleted += 1,
                    }
                    return Ok(());
                }
                Err(StoreError::NotFound(_)) if matches!(op, Op::Delete(_)) => return Ok(()),
                Err(
                    error @ (StoreError::Conflict(_)
                    | StoreError::AlreadyExists(_)
                    | StoreError::NotFound(_)),
                ) if attempt < MAX_ATTEMPTS => {
                    tracing::debug!(%id, attempt, %error, "Retrying write");
                    summary.conflicts += 1;
                    self.metrics.conflict();
                    let observed = self.store.get_envoy_filter(&id).await?;
                    next = diff::plan_one(desired.get(&id).copied(), observed.as_ref());
                }
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    async fn write(&self, op: &Op) -> Result<(), StoreError> {
        match op {
            Op::Create(filter) => self.store.create_envoy_filter(filter).await,
            Op::Replace(filter) => self.store.replace_envoy_filter(filter).await,
            Op::Delete(id) => self.store.delete_envoy_filter(id).await,
        }
    }

    /// Patches the status of every policy whose condition changed.
    async fn publish(
        &self,
        index: &RouteIndex<'_>,
        translation: &Translation,
        summary: &mut PassSummary,
    ) -> Result<(), StoreError> {
        #[cfg(not(test))]
        let now = Utc::now();
        #[cfg(test)]
        let now = chrono::DateTime::<Utc>::MIN_UTC;

        for (id, policy) in index.policies() {
            let Some(status) = translation.policies.get(id) else {
                continue;
            };
            let current = policy
                .status
                .as_ref()
                .map(|s| s.conditions.as_slice())
                .unwrap_or_default();
            let desired = vec![condition(status, now)];
            if eq_time_insensitive(current, &desired) {
                continue;
            }

            tracing::info!(policy = %id, reason = %desired[0].reason, "Updating status");
            match self
                .store
                .patch_policy_status(id, conditions::make_patch(id, desired))
                .await
            {
                Ok(()) => {}
                // Deleted since the snapshot was read.
                Err(StoreError::NotFound(_)) => continue,
                Err(error) => return Err(error),
            }
            summary.statuses += 1;
            self.metrics.status_patch();
        }
        Ok(())
    }
}
