//! Derive the set of execution contexts a tenant's triggers may be bound to.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::crds::ExecutionContext;
use crate::integration::{ClusterSource, Integration};
use crate::naming::{tenant_namespace, tenant_pvc, CONTROL_CLUSTER_NAME};
use crate::store::{StoreError, TenantStore};

/// Map key of a cluster. The control cluster always collapses to one key.
#[must_use]
pub fn cluster_key(source: &ClusterSource) -> String {
    if source.is_control_cluster {
        CONTROL_CLUSTER_NAME.to_string()
    } else {
        source.cluster_name.clone()
    }
}

/// Fill in the tenant's namespace and PVC where the integration left them empty.
#[must_use]
pub fn with_tenant_defaults(mut source: ClusterSource, tenant: &str) -> ClusterSource {
    if source.namespace.is_empty() {
        source.namespace = tenant_namespace(tenant);
    }
    if source.pvc.is_empty() {
        source.pvc = tenant_pvc(tenant);
    }
    source
}

pub struct ExecutionContextStore<S> {
    store: Arc<S>,
}

impl<S> Clone for ExecutionContextStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: TenantStore> ExecutionContextStore<S> {
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Worker-capable cluster integrations of a tenant, with namespace and PVC
    /// defaulted. Integrations that are not worker clusters are left out.
    pub async fn list_schedulable_clusters(
        &self,
        tenant: &str,
    ) -> Result<Vec<Integration>, StoreError> {
        let integrations = self.store.list_schedulable_integrations(tenant).await?;

        Ok(integrations
            .into_iter()
            .filter_map(|mut integration| {
                let source = integration.worker_cluster()?.clone();
                integration.cluster = Some(with_tenant_defaults(source, tenant));
                Some(integration)
            })
            .collect())
    }

    /// Available execution contexts keyed by cluster key.
    ///
    /// An empty map means nothing is schedulable for the tenant.
    pub async fn available_execution_contexts(
        &self,
        tenant: &str,
    ) -> Result<BTreeMap<String, ExecutionContext>, StoreError> {
        let mut available = BTreeMap::new();
        for integration in self.list_schedulable_clusters(tenant).await? {
            let Some(source) = integration.cluster else {
                continue;
            };
            let key = cluster_key(&source);
            available.insert(
                key.clone(),
                ExecutionContext {
                    cluster: key,
                    namespace: source.namespace,
                    pvc: source.pvc,
                },
            );
        }

        debug!(
            tenant = %tenant,
            clusters = ?available.keys().collect::<Vec<_>>(),
            "Resolved available execution contexts"
        );
        Ok(available)
    }
}
