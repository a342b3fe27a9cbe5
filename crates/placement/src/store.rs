//! Access to per-tenant resources: integrations and workflow triggers.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{ListParams, PostParams};
use kube::{Api, Client, Error as KubeError, ResourceExt};
use thiserror::Error;
use tracing::{debug, warn};

use crate::crds::WorkflowTrigger;
use crate::integration::Integration;
use crate::naming::{schedulable_cluster_selector, tenant_namespace};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] KubeError),

    #[error("{kind} {name} was modified concurrently")]
    Conflict { kind: &'static str, name: String },

    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("integration {name} is malformed: {reason}")]
    MalformedIntegration { name: String, reason: String },
}

impl StoreError {
    /// Optimistic-concurrency failure: the write was based on a stale version.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    fn from_kube(kind: &'static str, name: &str, err: KubeError) -> Self {
        match err {
            KubeError::Api(resp) if resp.code == 409 => Self::Conflict {
                kind,
                name: name.to_string(),
            },
            KubeError::Api(resp) if resp.code == 404 => Self::NotFound {
                kind,
                name: name.to_string(),
            },
            other => Self::KubeError(other),
        }
    }
}

/// Equality label selector over workflow triggers. Empty selects everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerSelector {
    pub labels: BTreeMap<String, String>,
}

impl TriggerSelector {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn matches(&self, trigger: &WorkflowTrigger) -> bool {
        let labels = trigger.labels();
        self.labels
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }

    /// Render as a Kubernetes label selector string.
    #[must_use]
    pub fn to_label_selector(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Tenant-scoped resource store.
///
/// Writes are optimistic: `update_workflow_trigger` must fail with
/// [`StoreError::Conflict`] when the trigger's resource version is stale.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Cluster integrations carrying the schedulable label.
    async fn list_schedulable_integrations(&self, tenant: &str)
        -> Result<Vec<Integration>, StoreError>;

    async fn get_integration(&self, tenant: &str, name: &str) -> Result<Integration, StoreError>;

    async fn list_workflow_triggers(
        &self,
        tenant: &str,
        selector: &TriggerSelector,
    ) -> Result<Vec<WorkflowTrigger>, StoreError>;

    async fn get_workflow_trigger(
        &self,
        tenant: &str,
        name: &str,
    ) -> Result<WorkflowTrigger, StoreError>;

    async fn update_workflow_trigger(
        &self,
        tenant: &str,
        trigger: &WorkflowTrigger,
    ) -> Result<WorkflowTrigger, StoreError>;
}

/// [`TenantStore`] backed by the Kubernetes API, one namespace per tenant.
#[derive(Clone)]
pub struct KubeTenantStore {
    client: Client,
}

impl KubeTenantStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn secrets(&self, tenant: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &tenant_namespace(tenant))
    }

    fn triggers(&self, tenant: &str) -> Api<WorkflowTrigger> {
        Api::namespaced(self.client.clone(), &tenant_namespace(tenant))
    }
}

#[async_trait]
impl TenantStore for KubeTenantStore {
    async fn list_schedulable_integrations(
        &self,
        tenant: &str,
    ) -> Result<Vec<Integration>, StoreError> {
        let lp = ListParams::default().labels(&schedulable_cluster_selector());
        let secrets = self.secrets(tenant).list(&lp).await?;

        let mut integrations = Vec::with_capacity(secrets.items.len());
        for secret in &secrets.items {
            match Integration::from_secret(secret) {
                Ok(integration) => integrations.push(integration),
                Err(e) => warn!(tenant = %tenant, error = %e, "Skipping malformed integration"),
            }
        }
        debug!(tenant = %tenant, count = integrations.len(), "Listed schedulable integrations");
        Ok(integrations)
    }

    async fn get_integration(&self, tenant: &str, name: &str) -> Result<Integration, StoreError> {
        let secret = self
            .secrets(tenant)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube("Integration", name, e))?;
        Integration::from_secret(&secret)
    }

    async fn list_workflow_triggers(
        &self,
        tenant: &str,
        selector: &TriggerSelector,
    ) -> Result<Vec<WorkflowTrigger>, StoreError> {
        let mut lp = ListParams::default();
        if !selector.labels.is_empty() {
            lp = lp.labels(&selector.to_label_selector());
        }
        Ok(self.triggers(tenant).list(&lp).await?.items)
    }

    async fn get_workflow_trigger(
        &self,
        tenant: &str,
        name: &str,
    ) -> Result<WorkflowTrigger, StoreError> {
        self.triggers(tenant)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube("WorkflowTrigger", name, e))
    }

    async fn update_workflow_trigger(
        &self,
        tenant: &str,
        trigger: &WorkflowTrigger,
    ) -> Result<WorkflowTrigger, StoreError> {
        let name = trigger.name_any();
        // replace carries metadata.resourceVersion, so a stale copy gets a 409
        self.triggers(tenant)
            .replace(&name, &PostParams::default(), trigger)
            .await
            .map_err(|e| StoreError::from_kube("WorkflowTrigger", &name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{WorkflowRunSpec, WorkflowTriggerSpec};
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> KubeError {
        KubeError::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn test_from_kube_maps_status_codes() {
        assert!(StoreError::from_kube("WorkflowTrigger", "t", api_error(409)).is_conflict());
        assert!(matches!(
            StoreError::from_kube("WorkflowTrigger", "t", api_error(404)),
            StoreError::NotFound { .. }
        ));
        assert!(matches!(
            StoreError::from_kube("WorkflowTrigger", "t", api_error(500)),
            StoreError::KubeError(_)
        ));
    }

    #[test]
    fn test_selector_matches_labels() {
        let mut trigger = WorkflowTrigger::new(
            "on-push",
            WorkflowTriggerSpec {
                workflow_ref: "build".to_string(),
                workflow_run_spec: WorkflowRunSpec::default(),
                scm: None,
                disabled: false,
            },
        );
        trigger
            .labels_mut()
            .insert("repo".to_string(), "acme.api".to_string());

        assert!(TriggerSelector::all().matches(&trigger));
        assert!(TriggerSelector::all()
            .with_label("repo", "acme.api")
            .matches(&trigger));
        assert!(!TriggerSelector::all()
            .with_label("repo", "acme.web")
            .matches(&trigger));
        assert_eq!(
            TriggerSelector::all()
                .with_label("b", "2")
                .with_label("a", "1")
                .to_label_selector(),
            "a=1,b=2"
        );
    }
}
