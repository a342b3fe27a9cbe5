//! `WorkflowTrigger` Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Where a workflow run executes: a worker cluster plus a namespace and PVC in it.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub struct ExecutionContext {
    /// Cluster key, `control-cluster` for the control cluster
    pub cluster: String,
    pub namespace: String,
    pub pvc: String,
}

/// Run template shared by every run a trigger starts
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct WorkflowRunSpec {
    #[serde(
        default,
        rename = "executionContext",
        skip_serializing_if = "Option::is_none"
    )]
    pub execution_context: Option<ExecutionContext>,

    #[serde(
        default,
        rename = "serviceAccount",
        skip_serializing_if = "Option::is_none"
    )]
    pub service_account: Option<String>,
}

/// SCM event source of a trigger
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct ScmTrigger {
    /// Name of the SCM integration secret
    pub secret: String,
    /// Repository in `owner/name` form
    pub repo: String,
}

/// WorkflowTrigger CRD for starting workflow runs on SCM events or schedules
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(group = "workflows.platform", version = "v1alpha1", kind = "WorkflowTrigger")]
#[kube(namespaced)]
#[kube(printcolumn = r#"{"name":"Workflow","type":"string","jsonPath":".spec.workflowRef"}"#)]
#[kube(
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.workflowRunSpec.executionContext.cluster"}"#
)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
pub struct WorkflowTriggerSpec {
    #[serde(rename = "workflowRef")]
    pub workflow_ref: String,

    #[serde(default, rename = "workflowRunSpec")]
    pub workflow_run_spec: WorkflowRunSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scm: Option<ScmTrigger>,

    #[serde(default)]
    pub disabled: bool,
}

impl WorkflowTrigger {
    #[must_use]
    pub fn execution_context(&self) -> Option<&ExecutionContext> {
        self.spec.workflow_run_spec.execution_context.as_ref()
    }

    /// Bind the trigger to a context, replacing any previous binding.
    pub fn bind_execution_context(&mut self, context: ExecutionContext) {
        self.spec.workflow_run_spec.execution_context = Some(context);
    }
}
