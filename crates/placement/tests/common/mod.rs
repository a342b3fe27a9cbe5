//! In-memory tenant store shared by the placement integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::core::ErrorResponse;
use kube::ResourceExt;
use placement::crds::{ExecutionContext, WorkflowRunSpec};
use placement::integration::{ClusterSource, Integration, IntegrationType, ScmSource, ScmType};
use placement::{StoreError, TenantStore, TriggerSelector, WorkflowTrigger, WorkflowTriggerSpec};

/// Optimistic-concurrency store keyed by tenant. Every successful update
/// bumps the trigger's resource version.
#[derive(Default)]
pub struct InMemoryStore {
    integrations: Mutex<HashMap<String, Vec<Integration>>>,
    triggers: Mutex<HashMap<String, BTreeMap<String, WorkflowTrigger>>>,
    /// Remaining conflicts to inject per trigger, simulating concurrent writers.
    conflicts: Mutex<HashMap<String, usize>>,
    failing: Mutex<HashSet<String>>,
    updates: Mutex<Vec<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_integration(&self, tenant: &str, integration: Integration) {
        self.integrations
            .lock()
            .unwrap()
            .entry(tenant.to_string())
            .or_default()
            .push(integration);
    }

    pub fn remove_integration(&self, tenant: &str, name: &str) {
        if let Some(list) = self.integrations.lock().unwrap().get_mut(tenant) {
            list.retain(|i| i.name != name);
        }
    }

    pub fn add_trigger(&self, tenant: &str, mut trigger: WorkflowTrigger) {
        trigger.metadata.resource_version = Some("1".to_string());
        self.triggers
            .lock()
            .unwrap()
            .entry(tenant.to_string())
            .or_default()
            .insert(trigger.name_any(), trigger);
    }

    pub fn trigger(&self, tenant: &str, name: &str) -> WorkflowTrigger {
        self.triggers.lock().unwrap()[tenant][name].clone()
    }

    pub fn bound_cluster(&self, tenant: &str, name: &str) -> Option<String> {
        self.trigger(tenant, name)
            .execution_context()
            .map(|c| c.cluster.clone())
    }

    /// The next `times` updates of `name` conflict, as if someone else wrote first.
    pub fn inject_conflicts(&self, name: &str, times: usize) {
        self.conflicts
            .lock()
            .unwrap()
            .insert(name.to_string(), times);
    }

    /// Every update of `name` fails with a server error.
    pub fn fail_updates(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    /// Trigger names of every update call, successful or not.
    pub fn updates(&self) -> Vec<String> {
        self.updates.lock().unwrap().clone()
    }
}

fn bump(version: Option<&String>) -> String {
    let current: u64 = version.and_then(|v| v.parse().ok()).unwrap_or(0);
    (current + 1).to_string()
}

#[async_trait]
impl TenantStore for InMemoryStore {
    async fn list_schedulable_integrations(
        &self,
        tenant: &str,
    ) -> Result<Vec<Integration>, StoreError> {
        Ok(self
            .integrations
            .lock()
            .unwrap()
            .get(tenant)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|i| i.kind == IntegrationType::Cluster)
            .collect())
    }

    async fn get_integration(&self, tenant: &str, name: &str) -> Result<Integration, StoreError> {
        self.integrations
            .lock()
            .unwrap()
            .get(tenant)
            .and_then(|list| list.iter().find(|i| i.name == name).cloned())
            .ok_or_else(|| StoreError::NotFound {
                kind: "Integration",
                name: name.to_string(),
            })
    }

    async fn list_workflow_triggers(
        &self,
        tenant: &str,
        selector: &TriggerSelector,
    ) -> Result<Vec<WorkflowTrigger>, StoreError> {
        Ok(self
            .triggers
            .lock()
            .unwrap()
            .get(tenant)
            .map(|all| all.values().filter(|t| selector.matches(t)).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_workflow_trigger(
        &self,
        tenant: &str,
        name: &str,
    ) -> Result<WorkflowTrigger, StoreError> {
        self.triggers
            .lock()
            .unwrap()
            .get(tenant)
            .and_then(|all| all.get(name).cloned())
            .ok_or_else(|| StoreError::NotFound {
                kind: "WorkflowTrigger",
                name: name.to_string(),
            })
    }

    async fn update_workflow_trigger(
        &self,
        tenant: &str,
        trigger: &WorkflowTrigger,
    ) -> Result<WorkflowTrigger, StoreError> {
        let name = trigger.name_any();
        self.updates.lock().unwrap().push(name.clone());

        if self.failing.lock().unwrap().contains(&name) {
            return Err(StoreError::KubeError(kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: "etcd unavailable".to_string(),
                reason: "InternalError".to_string(),
                code: 500,
            })));
        }

        let mut triggers = self.triggers.lock().unwrap();
        let stored = triggers
            .get_mut(tenant)
            .and_then(|all| all.get_mut(&name))
            .ok_or_else(|| StoreError::NotFound {
                kind: "WorkflowTrigger",
                name: name.clone(),
            })?;

        let conflict = StoreError::Conflict {
            kind: "WorkflowTrigger",
            name: name.clone(),
        };
        if let Some(remaining) = self.conflicts.lock().unwrap().get_mut(&name) {
            if *remaining > 0 {
                *remaining -= 1;
                // the concurrent writer moved the version on
                stored.metadata.resource_version = Some(bump(stored.metadata.resource_version.as_ref()));
                return Err(conflict);
            }
        }
        if trigger.metadata.resource_version != stored.metadata.resource_version {
            return Err(conflict);
        }

        let mut updated = trigger.clone();
        updated.metadata.resource_version = Some(bump(stored.metadata.resource_version.as_ref()));
        *stored = updated.clone();
        Ok(updated)
    }
}

pub fn cluster(name: &str) -> Integration {
    Integration {
        name: name.to_string(),
        kind: IntegrationType::Cluster,
        cluster: Some(ClusterSource {
            cluster_name: name.to_string(),
            is_control_cluster: false,
            is_worker_cluster: true,
            namespace: String::new(),
            pvc: String::new(),
        }),
        scm: None,
    }
}

pub fn github(name: &str) -> Integration {
    Integration {
        name: name.to_string(),
        kind: IntegrationType::Scm,
        cluster: None,
        scm: Some(ScmSource {
            kind: ScmType::GitHub,
            server: "https://github.com".to_string(),
            token: "t0k".to_string(),
        }),
    }
}

pub fn context(tenant: &str, cluster: &str) -> ExecutionContext {
    ExecutionContext {
        cluster: cluster.to_string(),
        namespace: format!("ci--{tenant}"),
        pvc: format!("ci-pvc-{tenant}"),
    }
}

pub fn trigger(name: &str, bound: Option<ExecutionContext>) -> WorkflowTrigger {
    WorkflowTrigger::new(
        name,
        WorkflowTriggerSpec {
            workflow_ref: "build-and-push".to_string(),
            workflow_run_spec: WorkflowRunSpec {
                execution_context: bound,
                service_account: None,
            },
            scm: None,
            disabled: false,
        },
    )
}
