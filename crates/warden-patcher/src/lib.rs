//! Patcher: applies computed tenant limits to the shared runtime-overrides
//! document.
//!
//! Writes are read-modify-write under optimistic concurrency (fresh read per
//! attempt, exponential backoff on conflicts, snapshot taken on the first
//! attempt only) and the merge itself is non-destructive: unmanaged keys and
//! untouched tenants round-trip unchanged. An optional rollout trigger
//! annotates downstream workloads after a successful write; limit
//! propagation itself never needs restarts.

mod merge;

pub use merge::{current_limits, merge_limits, KeyChange, MergeOutcome, METADATA_KEY};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};
use warden_config::{RolloutConfig, TargetConfig};
use warden_store::{get_or_create, Document, DocumentStore};
use warden_types::{LimitDefinition, LimitValue, TenantLimits, WardenError, WardenResult};
use warden_utils::{with_conflict_retry, BackoffPolicy, TenantSelector};

/// Restart-annotation contract for the optional rollout trigger. The
/// orchestrator-backed implementation is out of tree.
#[async_trait]
pub trait WorkloadRestarter: Send + Sync {
    async fn trigger_restart(&self, workload: &str) -> WardenResult<()>;
}

/// Default restarter: records the intent in the log and does nothing else.
#[derive(Debug, Default)]
pub struct NoopRestarter;

#[async_trait]
impl WorkloadRestarter for NoopRestarter {
    async fn trigger_restart(&self, workload: &str) -> WardenResult<()> {
        debug!(workload, "rollout trigger (no-op)");
        Ok(())
    }
}

/// Outcome of one apply pass.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub changes: Vec<KeyChange>,
    pub tenants_touched: usize,
    /// False when the merge was a no-op and no write went out.
    pub wrote: bool,
}

pub struct Patcher {
    store: Arc<dyn DocumentStore>,
    target: TargetConfig,
    selector: TenantSelector,
    definitions: HashMap<String, LimitDefinition>,
    policy: BackoffPolicy,
    rollout: RolloutConfig,
    restarter: Arc<dyn WorkloadRestarter>,
    /// Pre-apply snapshot from the most recent write, for rollback.
    snapshot: RwLock<Option<Document>>,
    labels: BTreeMap<String, String>,
}

impl Patcher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        target: TargetConfig,
        selector: TenantSelector,
        definitions: &[LimitDefinition],
        rollout: RolloutConfig,
        restarter: Arc<dyn WorkloadRestarter>,
    ) -> Self {
        Self {
            store,
            target,
            selector,
            definitions: definitions
                .iter()
                .map(|d| (d.name.clone(), d.clone()))
                .collect(),
            policy: BackoffPolicy::patcher(),
            rollout,
            restarter,
            snapshot: RwLock::new(None),
            labels: BTreeMap::from([(
                "app.kubernetes.io/managed-by".to_string(),
                "warden".to_string(),
            )]),
        }
    }

    /// Merge the limits into the shared document and write it back.
    ///
    /// Filtered-out tenants never reach the document. The pre-apply snapshot
    /// is taken on attempt 0 only, so a mid-retry conflict cannot shift the
    /// rollback point.
    pub async fn apply_limits(
        &self,
        limits: &BTreeMap<String, TenantLimits>,
    ) -> WardenResult<ApplyOutcome> {
        let admitted = self.admitted(limits);

        let resource = self.target.configmap_name.clone();
        let outcome = with_conflict_retry(&resource, &self.policy, |attempt| {
            let admitted = &admitted;
            async move {
                let mut doc = get_or_create(
                    self.store.as_ref(),
                    &self.target.namespace,
                    &self.target.configmap_name,
                    &self.labels,
                )
                .await?;

                if attempt == 0 {
                    *self.snapshot.write().expect("snapshot lock") = Some(doc.clone());
                }

                let existing = doc
                    .data
                    .get(&self.target.overrides_key)
                    .cloned()
                    .unwrap_or_default();
                let merged = merge_limits(
                    &existing,
                    admitted,
                    |_, key| self.definitions.get(key).map(|d| d.enabled).unwrap_or(false),
                    Utc::now(),
                    "warden-reconciler",
                )?;

                if !merged.changed() {
                    return Ok(ApplyOutcome {
                        changes: Vec::new(),
                        tenants_touched: 0,
                        wrote: false,
                    });
                }

                let tenants_touched = merged.tenants_touched();
                doc.data
                    .insert(self.target.overrides_key.clone(), merged.content);
                self.store.update(doc).await?;
                Ok(ApplyOutcome {
                    changes: merged.changes,
                    tenants_touched,
                    wrote: true,
                })
            }
        })
        .await?;

        if outcome.wrote {
            info!(
                tenants = outcome.tenants_touched,
                keys = outcome.changes.len(),
                "overrides document updated"
            );
            self.maybe_trigger_rollout().await;
        } else {
            debug!("overrides document already up to date");
        }
        Ok(outcome)
    }

    /// Projected document after applying `limits`, without writing.
    pub async fn preview_limits(
        &self,
        limits: &BTreeMap<String, TenantLimits>,
    ) -> WardenResult<MergeOutcome> {
        let admitted = self.admitted(limits);
        let existing = match self
            .store
            .get(&self.target.namespace, &self.target.configmap_name)
            .await?
        {
            Some(doc) => doc
                .data
                .get(&self.target.overrides_key)
                .cloned()
                .unwrap_or_default(),
            None => String::new(),
        };
        merge_limits(
            &existing,
            &admitted,
            |_, key| self.definitions.get(key).map(|d| d.enabled).unwrap_or(false),
            Utc::now(),
            "warden-preview",
        )
    }

    /// Restore the most recent pre-apply snapshot.
    pub async fn rollback_changes(&self) -> WardenResult<()> {
        let snapshot = self
            .snapshot
            .read()
            .expect("snapshot lock")
            .clone()
            .ok_or_else(|| WardenError::NotFound("no pre-apply snapshot".to_string()))?;

        let resource = self.target.configmap_name.clone();
        with_conflict_retry(&resource, &self.policy, |_| {
            let snapshot = snapshot.clone();
            async move {
                let mut current = self
                    .store
                    .get(&self.target.namespace, &self.target.configmap_name)
                    .await?
                    .ok_or_else(|| {
                        WardenError::NotFound(format!(
                            "{}/{}",
                            self.target.namespace, self.target.configmap_name
                        ))
                    })?;
                current.data = snapshot.data.clone();
                self.store.update(current).await?;
                Ok(())
            }
        })
        .await?;

        warn!("overrides document rolled back to pre-apply snapshot");
        Ok(())
    }

    /// The document's current tenant → limits view.
    pub async fn get_current_limits(
        &self,
    ) -> WardenResult<BTreeMap<String, BTreeMap<String, LimitValue>>> {
        match self
            .store
            .get(&self.target.namespace, &self.target.configmap_name)
            .await?
        {
            Some(doc) => {
                let content = doc
                    .data
                    .get(&self.target.overrides_key)
                    .cloned()
                    .unwrap_or_default();
                current_limits(&content)
            }
            None => Ok(BTreeMap::new()),
        }
    }

    fn admitted(&self, limits: &BTreeMap<String, TenantLimits>) -> BTreeMap<String, TenantLimits> {
        limits
            .iter()
            .filter(|(tenant, _)| {
                let admitted = self.selector.should_process(tenant);
                if !admitted {
                    debug!(tenant = %tenant, "tenant excluded from patch by filter");
                }
                admitted
            })
            .map(|(tenant, tl)| (tenant.clone(), tl.clone()))
            .collect()
    }

    async fn maybe_trigger_rollout(&self) {
        if !self.rollout.enabled {
            return;
        }
        for workload in &self.rollout.workloads {
            if let Err(e) = self.restarter.trigger_restart(workload).await {
                warn!(workload = %workload, error = %e, "rollout trigger failed");
            }
        }
    }
}
