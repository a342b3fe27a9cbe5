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

//! Placement reconciler CLI: rebinds workflow triggers whose execution
//! context points at a cluster that is no longer schedulable, and manages the
//! SCM webhooks triggers share.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use placement::{ExecutionContextScheduler, KubeTenantStore, PlacementConfig, WebhookRegistry};

/// Placement reconciler for workflow trigger execution contexts.
#[derive(Parser)]
#[command(name = "placement-reconciler")]
#[command(about = "Keep workflow triggers bound to schedulable clusters")]
#[command(version)]
struct Cli {
    /// YAML configuration file; defaults apply when it does not exist.
    #[arg(long, env = "PLACEMENT_CONFIG", default_value = "/config/placement.yaml")]
    config: PathBuf,

    /// Log format.
    #[arg(long, env = "LOG_FORMAT", default_value = "text", value_parser = ["text", "json"])]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile one tenant once.
    Reconcile {
        /// Tenant name.
        #[arg(long, env = "TENANT")]
        tenant: String,
    },

    /// Reconcile tenants periodically until interrupted.
    Watch {
        /// Tenants (comma-separated); falls back to the config file.
        #[arg(long, env = "TENANTS", value_delimiter = ',')]
        tenants: Vec<String>,

        /// Seconds between passes; falls back to the config file.
        #[arg(long, env = "RECONCILE_INTERVAL_SECONDS")]
        interval: Option<u64>,
    },

    /// Manage the SCM webhook shared by a repository's triggers.
    Webhook {
        #[command(subcommand)]
        action: WebhookAction,
    },
}

#[derive(Subcommand)]
enum WebhookAction {
    /// Register the repo webhook unless another trigger already did.
    Register(WebhookArgs),
    /// Remove the repo webhook unless other triggers still use it.
    Unregister(WebhookArgs),
}

#[derive(clap::Args)]
struct WebhookArgs {
    /// Tenant name.
    #[arg(long, env = "TENANT")]
    tenant: String,

    /// Trigger being created or deleted.
    #[arg(long)]
    trigger: String,

    /// SCM integration secret name.
    #[arg(long)]
    integration: String,

    /// Repository in owner/name form.
    #[arg(long)]
    repo: String,

    /// Public base URL SCM events are delivered to; falls back to the config file.
    #[arg(long, env = "WEBHOOK_BASE_URL")]
    base_url: Option<String>,
}

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

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, shutting down");
}

async fn watch(
    scheduler: &ExecutionContextScheduler<KubeTenantStore>,
    tenants: &[String],
    mut config: PlacementConfig,
    interval: Option<u64>,
) -> Result<()> {
    if let Some(secs) = interval {
        config.interval_seconds = secs;
        config.validate().context("Invalid --interval")?;
    }

    let mut ticker = tokio::time::interval(config.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!(tenants = ?tenants, interval_secs = config.interval_seconds, "Watching tenants");
    loop {
        tokio::select! {
            () = &mut shutdown => return Ok(()),
            _ = ticker.tick() => {
                // Tenants are independent; one failing does not hold up the rest.
                let passes = tenants.iter().map(|tenant| async move {
                    if let Err(e) = scheduler.reconcile_trigger_execution_context(tenant).await {
                        error!(tenant = %tenant, error = %e, "Reconcile failed");
                    }
                });
                join_all(passes).await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format == "json");

    let config = PlacementConfig::from_mounted_file(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    config.validate()?;

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let store = Arc::new(KubeTenantStore::new(client));
    let scheduler =
        ExecutionContextScheduler::new(Arc::clone(&store)).with_retry(config.retry_config());

    match cli.command {
        Commands::Reconcile { tenant } => {
            let summary = scheduler
                .reconcile_trigger_execution_context(&tenant)
                .await
                .with_context(|| format!("Reconcile failed for tenant {tenant}"))?;
            for (trigger, cluster) in &summary.repaired {
                println!("{trigger} -> {cluster}");
            }
            info!(
                tenant = %tenant,
                examined = summary.examined,
                repaired = summary.repaired.len(),
                "Reconcile complete"
            );
        }
        Commands::Watch { tenants, interval } => {
            let tenants = if tenants.is_empty() {
                config.tenants.clone()
            } else {
                tenants
            };
            if tenants.is_empty() {
                bail!("No tenants to watch: pass --tenants or list them in the config file");
            }
            watch(&scheduler, &tenants, config, interval).await?;
        }
        Commands::Webhook { action } => {
            let (register, args) = match action {
                WebhookAction::Register(args) => (true, args),
                WebhookAction::Unregister(args) => (false, args),
            };
            let Some(base_url) = args.base_url.or(config.webhook_base_url) else {
                bail!("No webhook base URL: pass --base-url or set webhookBaseUrl in the config file");
            };
            let registry = WebhookRegistry::new(store, base_url);

            let changed = if register {
                registry
                    .register_scm_webhook(&args.tenant, &args.trigger, &args.integration, &args.repo)
                    .await
                    .context("Webhook registration failed")?
            } else {
                registry
                    .unregister_scm_webhook(&args.tenant, &args.trigger, &args.integration, &args.repo)
                    .await
                    .context("Webhook removal failed")?
            };
            let action = if register { "register" } else { "unregister" };
            info!(repo = %args.repo, action = %action, changed = changed, "Webhook request handled");
        }
    }

    Ok(())
}
