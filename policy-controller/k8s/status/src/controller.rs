use crate::{Reconciler, Store};
use htnn_policy_controller_core::ResourceId;
use htnn_policy_controller_k8s_index::ObjectKind;
use kubert::lease::Claim;
use std::{collections::BTreeSet, sync::Arc};
use tokio::{
    sync::{mpsc, watch},
    time::{self, Duration, Instant},
};

/// Identifies an object whose change requires a pass.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Trigger {
    pub kind: ObjectKind,
    pub id: ResourceId,
}

/// Runs reconciliation passes while this instance holds the write lease.
pub struct Controller<S> {
    claims: watch::Receiver<Arc<Claim>>,
    name: String,
    reconciler: Reconciler<S>,
    triggers: mpsc::Receiver<Trigger>,
    resync: Duration,
    pass_timeout: Duration,
}

// === impl Controller ===

impl<S: Store> Controller<S> {
    pub fn new(
        claims: watch::Receiver<Arc<Claim>>,
        name: impl ToString,
        reconciler: Reconciler<S>,
        triggers: mpsc::Receiver<Trigger>,
        resync: Duration,
        pass_timeout: Duration,
    ) -> Self {
        Self {
            claims,
            name: name.to_string(),
            reconciler,
            triggers,
            resync,
            pass_timeout,
        }
    }

    /// Runs passes on triggers and on every resync tick, until the trigger
    /// channel closes.
    pub async fn run(mut self) {
        let mut resync = time::interval_at(Instant::now() + self.resync, self.resync);
        resync.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            let mut pending = BTreeSet::new();
            tokio::select! {
                trigger = self.triggers.recv() => match trigger {
                    Some(trigger) => {
                        pending.insert(trigger);
                    }
                    None => return,
                },
                _ = resync.tick() => {}
            }
            // Coalesce whatever else is queued into the same pass.
            while let Ok(trigger) = self.triggers.try_recv() {
                pending.insert(trigger);
            }

            if !self.claims.borrow().is_current_for(&self.name) {
                tracing::trace!(triggers = pending.len(), "Not the leader; skipping");
                continue;
            }

            let triggers = pending.into_iter().collect::<Vec<_>>();
            let start = Instant::now();
            let result = time::timeout(self.pass_timeout, self.reconciler.pass(&triggers)).await;
            let elapsed = start.elapsed();
            let metrics = self.reconciler.metrics();
            match result {
                Ok(Ok(summary)) => {
                    if summary.writes() > 0 {
                        tracing::info!(?summary, ?elapsed, "Reconciled");
                    }
                    metrics.pass("ok", elapsed);
                }
                Ok(Err(error)) => {
                    tracing::warn!(%error, "Reconciliation failed; will retry");
                    metrics.pass("error", elapsed);
                }
                Err(_) => {
                    tracing::warn!(
                        timeout = ?self.pass_timeout,
                        "Reconciliation timed out; will retry"
                    );
                    metrics.pass("timeout", elapsed);
                }
            }
        }
    }
}
