//! Tenant resource names and label keys.

/// Prefix of the namespace that holds a tenant's resources.
pub const TENANT_NAMESPACE_PREFIX: &str = "ci--";

/// Prefix of a tenant's default PVC.
pub const TENANT_PVC_PREFIX: &str = "ci-pvc-";

/// Canonical key of the control cluster, however its integration names it.
pub const CONTROL_CLUSTER_NAME: &str = "control-cluster";

/// Marks an integration secret as a cluster eligible for scheduling.
pub const LABEL_SCHEDULABLE_CLUSTER: &str = "integration.workflows.platform/schedulable-cluster";

/// SCM integration a workflow trigger listens on.
pub const LABEL_TRIGGER_INTEGRATION: &str = "trigger.workflows.platform/integration";

pub const LABEL_VALUE_TRUE: &str = "true";

#[must_use]
pub fn tenant_namespace(tenant: &str) -> String {
    format!("{TENANT_NAMESPACE_PREFIX}{tenant}")
}

#[must_use]
pub fn tenant_pvc(tenant: &str) -> String {
    format!("{TENANT_PVC_PREFIX}{tenant}")
}

/// Label selector for schedulable cluster integrations.
#[must_use]
pub fn schedulable_cluster_selector() -> String {
    format!("{LABEL_SCHEDULABLE_CLUSTER}={LABEL_VALUE_TRUE}")
}
