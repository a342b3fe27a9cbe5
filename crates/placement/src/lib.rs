/*
 * 5D Labs Stagehand - Execution Placement
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Execution placement
//!
//! Decides which worker cluster, namespace and PVC a workflow trigger runs in,
//! and keeps those bindings valid as clusters join and leave a tenant's fleet.
//! Also hosts the webhook registry that serializes SCM webhook registration.

pub mod config;
pub mod crds;
pub mod execution_context;
pub mod integration;
pub mod naming;
pub mod retry;
pub mod scheduler;
pub mod scm;
pub mod store;
pub mod webhook;

// Re-export commonly used types
pub use config::PlacementConfig;
pub use crds::{ExecutionContext, ScmTrigger, WorkflowTrigger, WorkflowTriggerSpec};
pub use execution_context::ExecutionContextStore;
pub use integration::{ClusterSource, Integration, IntegrationType, ScmSource, ScmType};
pub use retry::{retry_on_conflict, RetryConfig};
pub use scheduler::{ExecutionContextScheduler, ReconcileSummary, SchedulerError};
pub use store::{KubeTenantStore, StoreError, TenantStore, TriggerSelector};
pub use webhook::{WebhookError, WebhookRegistry};
