//! Coordinator process configuration.
//!
//! The workflow controller injects the pod identity through environment
//! variables when it builds the stage pod; every setting can also be passed
//! as a flag for local runs.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::coordinator::StageSettings;
use crate::error::CoordinatorError;

const DEFAULT_NAMESPACE: &str = "default";

/// Stage coordinator sidecar.
#[derive(Parser, Debug, Clone)]
#[command(name = "stage-coordinator")]
#[command(about = "Drive a stage pod through its execution phases")]
pub struct CoordinatorConfig {
    /// Pod this coordinator runs in and polls.
    #[arg(long, env = "POD_NAME")]
    pub pod_name: String,

    /// Owning workflow run, used for log paths.
    #[arg(long, env = "WORKFLOWRUN_NAME")]
    pub workflowrun_name: String,

    /// Owning stage, used for log paths.
    #[arg(long, env = "STAGE_NAME")]
    pub stage_name: String,

    /// Namespace of the pod (empty means `default`).
    #[arg(long, env = "NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Deadline for each wait phase, in seconds.
    #[arg(long, env = "COORDINATOR_TIMEOUT_SECONDS", default_value = "3600")]
    pub timeout_seconds: u64,

    /// Directory receiving `<workflowrun>/<stage>/<container>.log` files.
    #[arg(long, env = "COORDINATOR_LOG_DIR", default_value = "/var/log/stage-logs")]
    pub log_dir: PathBuf,

    /// Marker file that tells the resolver sidecar the workload is done.
    #[arg(
        long,
        env = "RESOLVER_NOTIFY_FLAG",
        default_value = "/workspace/resolver-notify/ok"
    )]
    pub notify_flag: PathBuf,

    /// Name of this coordinator's own container.
    #[arg(long, env = "COORDINATOR_CONTAINER", default_value = "coordinator")]
    pub coordinator_container: String,

    /// Name of the resolver sidecar container.
    #[arg(long, env = "RESOLVER_CONTAINER", default_value = "resolver")]
    pub resolver_container: String,

    /// How long to wait for outstanding log streams before exiting, in seconds.
    #[arg(long, env = "LOG_DRAIN_TIMEOUT_SECONDS", default_value = "30")]
    pub log_drain_timeout_seconds: u64,

    /// Command exec'd in a container to terminate it.
    #[arg(long, env = "KILL_COMMAND", default_value = "kill -TERM 1")]
    pub kill_command: String,

    /// Log output format: `text` or `json`.
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}

impl CoordinatorConfig {
    /// Namespace with the empty-value fallback applied.
    #[must_use]
    pub fn namespace(&self) -> &str {
        let namespace = self.namespace.trim();
        if namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            namespace
        }
    }

    #[must_use]
    pub fn kill_command(&self) -> Vec<String> {
        self.kill_command
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    #[must_use]
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }

    /// Reject empty identity values and zero timeouts.
    pub fn validate(&self) -> Result<(), CoordinatorError> {
        for (name, value) in [
            ("POD_NAME", &self.pod_name),
            ("WORKFLOWRUN_NAME", &self.workflowrun_name),
            ("STAGE_NAME", &self.stage_name),
            ("COORDINATOR_CONTAINER", &self.coordinator_container),
            ("RESOLVER_CONTAINER", &self.resolver_container),
        ] {
            if value.trim().is_empty() {
                return Err(CoordinatorError::Config(format!("{name} must not be empty")));
            }
        }

        if self.timeout_seconds == 0 {
            return Err(CoordinatorError::Config(
                "COORDINATOR_TIMEOUT_SECONDS must be greater than zero".to_string(),
            ));
        }

        if self.kill_command().is_empty() {
            return Err(CoordinatorError::Config(
                "KILL_COMMAND must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Phase settings derived from this configuration.
    #[must_use]
    pub fn stage_settings(&self) -> StageSettings {
        StageSettings {
            timeout: Duration::from_secs(self.timeout_seconds),
            workflowrun_name: self.workflowrun_name.clone(),
            stage_name: self.stage_name.clone(),
            coordinator_container: self.coordinator_container.clone(),
            resolver_container: self.resolver_container.clone(),
            log_dir: self.log_dir.clone(),
            notify_flag: self.notify_flag.clone(),
            log_drain_timeout: Duration::from_secs(self.log_drain_timeout_seconds),
        }
    }
}
