/*
 * 5D Labs Stagehand - Stage Pod Coordinator
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

//! Stage pod coordinator
//!
//! A stage pod runs any number of user workload containers next to two
//! sidecars: this coordinator and an output resolver. There is no IPC between
//! them, so the coordinator synchronizes the pod by polling its own pod status
//! through the Kubernetes API and hands off to the resolver through a marker
//! file on a shared volume.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod pod;
pub mod runtime;

pub use config::CoordinatorConfig;
pub use coordinator::{Outcome, Phase, StageCoordinator, StageSettings};
pub use error::{CoordinatorError, RuntimeError};
pub use pod::{ContainerState, ContainerStatusSnapshot, PodSnapshot, Progress};
pub use runtime::{ContainerRuntime, KubePodClient, LogStream, PodClient};
