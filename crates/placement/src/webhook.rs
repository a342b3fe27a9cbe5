//! SCM webhook registry.
//!
//! A repository webhook is shared by every trigger of a tenant listening on
//! the same (integration, repo) pair. Triggers are selected by their
//! integration label and matched on `spec.scm.repo`; repos are never used as
//! label values. Registration and removal are serialized
//! by the registry's lock so two triggers created at once cannot both decide
//! the webhook is missing.
//!
//! Callers label a trigger with [`label_scm_trigger`], call
//! [`WebhookRegistry::register_scm_webhook`] before creating it, and
//! [`WebhookRegistry::unregister_scm_webhook`] before deleting it.

use std::sync::Arc;

use kube::ResourceExt;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::crds::WorkflowTrigger;
use crate::integration::{IntegrationType, ScmSource};
use crate::naming::LABEL_TRIGGER_INTEGRATION;
use crate::scm::{provider_for, EventType, ScmError, ScmProvider, Webhook};
use crate::store::{StoreError, TenantStore, TriggerSelector};

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("SCM error: {0}")]
    Scm(#[from] ScmError),

    #[error("integration {name} is not an SCM integration")]
    NotScmIntegration { name: String },
}

/// Builds the provider for an SCM integration.
pub type ProviderFactory =
    dyn Fn(&ScmSource) -> Result<Arc<dyn ScmProvider>, ScmError> + Send + Sync;

/// Stamp the integration label of an SCM trigger.
///
/// Triggers without an SCM source are left untouched.
pub fn label_scm_trigger(trigger: &mut WorkflowTrigger) {
    let Some(scm) = trigger.spec.scm.clone() else {
        return;
    };
    trigger
        .labels_mut()
        .insert(LABEL_TRIGGER_INTEGRATION.to_string(), scm.secret);
}

/// Endpoint SCM events for `integration` are delivered to.
#[must_use]
pub fn webhook_url(base: &str, tenant: &str, integration: &str) -> String {
    format!(
        "{}/tenants/{tenant}/webhook?sourceType=SCM&integration={integration}",
        base.trim_end_matches('/')
    )
}

fn integration_selector(integration: &str) -> TriggerSelector {
    TriggerSelector::all().with_label(LABEL_TRIGGER_INTEGRATION, integration)
}

fn listens_on(trigger: &WorkflowTrigger, repo: &str) -> bool {
    trigger.spec.scm.as_ref().map(|s| s.repo.as_str()) == Some(repo)
}

pub struct WebhookRegistry<S> {
    store: Arc<S>,
    providers: Arc<ProviderFactory>,
    webhook_base_url: String,
    lock: Mutex<()>,
}

impl<S: TenantStore> WebhookRegistry<S> {
    /// Registry backed by the built-in providers.
    #[must_use]
    pub fn new(store: Arc<S>, webhook_base_url: impl Into<String>) -> Self {
        Self {
            store,
            providers: Arc::new(provider_for),
            webhook_base_url: webhook_base_url.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_provider_factory(mut self, providers: Arc<ProviderFactory>) -> Self {
        self.providers = providers;
        self
    }

    async fn provider(
        &self,
        tenant: &str,
        integration: &str,
    ) -> Result<Arc<dyn ScmProvider>, WebhookError> {
        let found = self.store.get_integration(tenant, integration).await?;
        match (&found.kind, &found.scm) {
            (IntegrationType::Scm, Some(source)) => Ok((self.providers)(source)?),
            _ => Err(WebhookError::NotScmIntegration {
                name: integration.to_string(),
            }),
        }
    }

    /// Triggers of `tenant` listening on `repo` through `integration`.
    async fn repo_users(
        &self,
        tenant: &str,
        integration: &str,
        repo: &str,
    ) -> Result<Vec<WorkflowTrigger>, WebhookError> {
        let mut triggers = self
            .store
            .list_workflow_triggers(tenant, &integration_selector(integration))
            .await?;
        triggers.retain(|t| listens_on(t, repo));
        Ok(triggers)
    }

    /// Create the repo webhook unless another trigger already registered it.
    ///
    /// Returns whether a webhook was created.
    pub async fn register_scm_webhook(
        &self,
        tenant: &str,
        trigger: &str,
        integration: &str,
        repo: &str,
    ) -> Result<bool, WebhookError> {
        let _guard = self.lock.lock().await;

        let existing = self.repo_users(tenant, integration, repo).await?;
        if !existing.is_empty() {
            debug!(
                tenant = %tenant,
                trigger = %trigger,
                repo = %repo,
                users = existing.len(),
                "Webhook already registered"
            );
            return Ok(false);
        }

        let provider = self.provider(tenant, integration).await?;
        let webhook = Webhook {
            url: webhook_url(&self.webhook_base_url, tenant, integration),
            events: EventType::ALL.to_vec(),
        };
        provider.create_webhook(repo, &webhook).await?;

        info!(tenant = %tenant, trigger = %trigger, repo = %repo, "Registered SCM webhook");
        Ok(true)
    }

    /// Delete the repo webhook unless other triggers still use it.
    ///
    /// Delete failures at the SCM are logged, not returned. Returns whether a
    /// delete was attempted.
    pub async fn unregister_scm_webhook(
        &self,
        tenant: &str,
        trigger: &str,
        integration: &str,
        repo: &str,
    ) -> Result<bool, WebhookError> {
        let _guard = self.lock.lock().await;

        let users = self.repo_users(tenant, integration, repo).await?;
        if users.len() > 1 {
            debug!(
                tenant = %tenant,
                trigger = %trigger,
                repo = %repo,
                users = users.len(),
                "Webhook still used by other triggers"
            );
            return Ok(false);
        }

        let provider = self.provider(tenant, integration).await?;
        let url = webhook_url(&self.webhook_base_url, tenant, integration);
        if let Err(e) = provider.delete_webhook(repo, &url).await {
            warn!(tenant = %tenant, repo = %repo, error = %e, "Failed to delete SCM webhook");
        } else {
            info!(tenant = %tenant, trigger = %trigger, repo = %repo, "Unregistered SCM webhook");
        }
        Ok(true)
    }
}
