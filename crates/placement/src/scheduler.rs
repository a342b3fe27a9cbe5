//! # Execution context scheduler
//!
//! Keeps every workflow trigger of a tenant bound to a cluster that is still
//! schedulable. Triggers whose binding is missing or points at a cluster that
//! left the fleet are rebound to a uniformly random available context.
//! Triggers with a valid binding are never rewritten.
//!
//! Reconciliation is level-triggered and idempotent: call it again after any
//! change to the tenant's clusters and it converges.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::ResourceExt;
use rand::Rng;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::crds::{ExecutionContext, WorkflowTrigger};
use crate::execution_context::ExecutionContextStore;
use crate::retry::{retry_on_conflict, RetryConfig};
use crate::store::{StoreError, TenantStore, TriggerSelector};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("no schedulable execution context for tenant {tenant}")]
    NoExecutionContext { tenant: String },

    #[error("no execution context could be picked for trigger {trigger}")]
    NoRandomContext { trigger: String },

    #[error("failed to rebind trigger {trigger}: {source}")]
    UpdateTrigger {
        trigger: String,
        #[source]
        source: StoreError,
    },

    #[error("trigger reconcile task failed: {0}")]
    TaskFailed(String),
}

/// Result of a successful reconcile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub examined: usize,
    /// Rebound triggers with the cluster each now points at, by trigger name.
    pub repaired: BTreeMap<String, String>,
}

/// A binding needs repair when it is missing or names an unavailable cluster.
#[must_use]
pub fn needs_repair(
    trigger: &WorkflowTrigger,
    available: &BTreeMap<String, ExecutionContext>,
) -> bool {
    match trigger.execution_context() {
        Some(context) => !available.contains_key(&context.cluster),
        None => true,
    }
}

/// Uniformly random entry of the available set.
pub fn random_execution_context<R: Rng + ?Sized>(
    available: &BTreeMap<String, ExecutionContext>,
    rng: &mut R,
) -> Option<ExecutionContext> {
    if available.is_empty() {
        return None;
    }
    let index = rng.gen_range(0..available.len());
    available.values().nth(index).cloned()
}

pub struct ExecutionContextScheduler<S> {
    store: Arc<S>,
    contexts: ExecutionContextStore<S>,
    retry: RetryConfig,
}

impl<S: TenantStore + 'static> ExecutionContextScheduler<S> {
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self {
            contexts: ExecutionContextStore::new(Arc::clone(&store)),
            store,
            retry: RetryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Repair the execution context binding of every trigger of `tenant`.
    ///
    /// One task per trigger runs concurrently. All tasks run to completion
    /// even when some fail; the first failure in completion order is returned.
    pub async fn reconcile_trigger_execution_context(
        &self,
        tenant: &str,
    ) -> Result<ReconcileSummary, SchedulerError> {
        let available = self.contexts.available_execution_contexts(tenant).await?;
        if available.is_empty() {
            return Err(SchedulerError::NoExecutionContext {
                tenant: tenant.to_string(),
            });
        }
        let available = Arc::new(available);

        let triggers = self
            .store
            .list_workflow_triggers(tenant, &TriggerSelector::all())
            .await?;
        let examined = triggers.len();

        let mut tasks = JoinSet::new();
        for trigger in triggers {
            let store = Arc::clone(&self.store);
            let available = Arc::clone(&available);
            let retry = self.retry.clone();
            let tenant = tenant.to_string();
            tasks.spawn(async move {
                reconcile_trigger(store.as_ref(), &tenant, trigger, &available, &retry).await
            });
        }

        let mut repaired = BTreeMap::new();
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|e| SchedulerError::TaskFailed(e.to_string()));
            match result.and_then(|r| r) {
                Ok(Some((trigger, cluster))) => {
                    repaired.insert(trigger, cluster);
                }
                Ok(None) => {}
                Err(e) => {
                    error!(tenant = %tenant, error = %e, "Failed to reconcile trigger execution context");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        info!(
            tenant = %tenant,
            examined = examined,
            repaired = repaired.len(),
            "Reconciled trigger execution contexts"
        );
        Ok(ReconcileSummary { examined, repaired })
    }
}

/// Returns the trigger name and its new cluster when the binding was repaired.
async fn reconcile_trigger<S: TenantStore + ?Sized>(
    store: &S,
    tenant: &str,
    mut trigger: WorkflowTrigger,
    available: &BTreeMap<String, ExecutionContext>,
    retry: &RetryConfig,
) -> Result<Option<(String, String)>, SchedulerError> {
    let name = trigger.name_any();
    if !needs_repair(&trigger, available) {
        debug!(trigger = %name, "Execution context still available");
        return Ok(None);
    }

    let context = random_execution_context(available, &mut rand::thread_rng()).ok_or_else(|| {
        SchedulerError::NoRandomContext {
            trigger: name.clone(),
        }
    })?;
    let cluster = context.cluster.clone();

    // First attempt writes the listed copy; only a conflict costs a re-read.
    trigger.bind_execution_context(context.clone());
    let result = match store.update_workflow_trigger(tenant, &trigger).await {
        Err(e) if e.is_conflict() => {
            debug!(trigger = %name, "Trigger changed since listing, retrying on latest version");
            retry_on_conflict(retry, "rebind workflow trigger", || {
                rebind_latest(store, tenant, &name, &context)
            })
            .await
        }
        other => other.map(|_| ()),
    };

    result.map_err(|source| SchedulerError::UpdateTrigger {
        trigger: name.clone(),
        source,
    })?;

    info!(tenant = %tenant, trigger = %name, cluster = %cluster, "Rebound trigger execution context");
    Ok(Some((name, cluster)))
}

async fn rebind_latest<S: TenantStore + ?Sized>(
    store: &S,
    tenant: &str,
    name: &str,
    context: &ExecutionContext,
) -> Result<(), StoreError> {
    let mut latest = store.get_workflow_trigger(tenant, name).await?;
    latest.bind_execution_context(context.clone());
    store.update_workflow_trigger(tenant, &latest).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{WorkflowRunSpec, WorkflowTriggerSpec};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn context(cluster: &str) -> ExecutionContext {
        ExecutionContext {
            cluster: cluster.to_string(),
            namespace: "ci--acme".to_string(),
            pvc: "ci-pvc-acme".to_string(),
        }
    }

    fn available(clusters: &[&str]) -> BTreeMap<String, ExecutionContext> {
        clusters
            .iter()
            .map(|c| ((*c).to_string(), context(c)))
            .collect()
    }

    fn trigger(bound_to: Option<&str>) -> WorkflowTrigger {
        WorkflowTrigger::new(
            "on-push",
            WorkflowTriggerSpec {
                workflow_ref: "build".to_string(),
                workflow_run_spec: WorkflowRunSpec {
                    execution_context: bound_to.map(context),
                    service_account: None,
                },
                scm: None,
                disabled: false,
            },
        )
    }

    #[test]
    fn test_needs_repair() {
        let set = available(&["a", "b"]);
        assert!(needs_repair(&trigger(None), &set));
        assert!(needs_repair(&trigger(Some("c")), &set));
        assert!(!needs_repair(&trigger(Some("a")), &set));
    }

    #[test]
    fn test_random_context_empty_set() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(random_execution_context(&BTreeMap::new(), &mut rng).is_none());
    }

    #[test]
    fn test_random_context_covers_every_entry() {
        let set = available(&["a", "b", "c"]);
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..200 {
            seen.insert(random_execution_context(&set, &mut rng).unwrap().cluster);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_random_context_single_entry_is_deterministic() {
        let set = available(&["only"]);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..10 {
            assert_eq!(random_execution_context(&set, &mut rng), Some(context("only")));
        }
    }
}
