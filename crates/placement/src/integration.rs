//! Tenant integrations.
//!
//! Each integration is persisted as a Secret in the tenant namespace whose
//! `integration.json` key holds the JSON document below. Cluster integrations
//! describe a cluster workflows may run on; SCM integrations hold the
//! credentials used to manage repository webhooks.

use k8s_openapi::api::core::v1::Secret;
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// Secret data key holding the serialized integration.
pub const INTEGRATION_DATA_KEY: &str = "integration.json";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub enum IntegrationType {
    Cluster,
    #[serde(rename = "SCM")]
    Scm,
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSource {
    pub cluster_name: String,
    #[serde(default)]
    pub is_control_cluster: bool,
    #[serde(default)]
    pub is_worker_cluster: bool,
    /// Namespace workflows run in, empty for the tenant default
    #[serde(default)]
    pub namespace: String,
    /// PVC mounted by workflows, empty for the tenant default
    #[serde(default)]
    pub pvc: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub enum ScmType {
    GitHub,
    GitLab,
    Bitbucket,
    Gitea,
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ScmSource {
    #[serde(rename = "type")]
    pub kind: ScmType,
    pub server: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Integration {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: IntegrationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scm: Option<ScmSource>,
}

impl Integration {
    /// Decode an integration from its backing Secret.
    ///
    /// The secret name wins over any name recorded in the document.
    pub fn from_secret(secret: &Secret) -> Result<Self, StoreError> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        let malformed = |reason: String| StoreError::MalformedIntegration {
            name: name.clone(),
            reason,
        };

        let raw = secret
            .data
            .as_ref()
            .and_then(|data| data.get(INTEGRATION_DATA_KEY))
            .map(|bytes| bytes.0.clone())
            .or_else(|| {
                secret
                    .string_data
                    .as_ref()
                    .and_then(|data| data.get(INTEGRATION_DATA_KEY))
                    .map(|s| s.clone().into_bytes())
            })
            .ok_or_else(|| malformed(format!("missing {INTEGRATION_DATA_KEY} key")))?;

        let mut integration: Self =
            serde_json::from_slice(&raw).map_err(|e| malformed(e.to_string()))?;
        integration.name = name;
        Ok(integration)
    }

    /// Cluster source of a worker-capable cluster integration.
    #[must_use]
    pub fn worker_cluster(&self) -> Option<&ClusterSource> {
        match (&self.kind, &self.cluster) {
            (IntegrationType::Cluster, Some(cluster)) if cluster.is_worker_cluster => Some(cluster),
            _ => None,
        }
    }
}
