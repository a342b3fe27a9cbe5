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

//! Stage coordinator sidecar entry point.
//!
//! Reads the pod identity from the environment, runs the phase sequence once
//! and exits: 0 when every phase completed, 1 when the run was aborted.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use stage_coordinator::{
    ContainerRuntime, CoordinatorConfig, KubePodClient, Outcome, StageCoordinator,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(config: CoordinatorConfig) -> Result<Outcome> {
    config.validate()?;

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    info!(
        pod = %config.pod_name,
        namespace = %config.namespace(),
        workflowrun = %config.workflowrun_name,
        stage = %config.stage_name,
        "Coordinator configured"
    );

    let pods = KubePodClient::new(client, config.namespace(), &config.pod_name)
        .with_kill_command(config.kill_command());
    let coordinator = StageCoordinator::new(ContainerRuntime::new(pods), config.stage_settings());

    Ok(coordinator.run().await)
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = CoordinatorConfig::parse();
    init_tracing(config.json_logs());

    match run(config).await {
        Ok(Outcome::Done { .. }) => ExitCode::SUCCESS,
        Ok(Outcome::Aborted { .. }) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Coordinator failed to start");
            ExitCode::FAILURE
        }
    }
}
