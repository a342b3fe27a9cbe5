//! # Stage Coordinator
//!
//! Drives one stage pod through a fixed, strictly sequential phase sequence:
//!
//! 1. `WaitRunning`: every container left the waiting state.
//! 2. `CollectLogs`: one log task per container except the coordinator.
//! 3. `WaitWorkloadTerminate`: every workload container terminated.
//! 4. `NotifyResolver`: create the resolver's marker file.
//! 5. `WaitAllOthersTerminate`: everything but the coordinator terminated.
//!
//! A timeout in phase 3 or 5 kills every other container and aborts the run;
//! later phases never execute after an abort. The run is not resumable: a
//! restarted coordinator starts again from phase 1.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::CoordinatorError;
use crate::pod::ContainerState;
use crate::runtime::{ContainerRuntime, PodClient};

/// Name of the marker written once all log streams are drained.
pub const LOG_EOF_MARKER: &str = ".eof";

/// Immutable per-pod settings for one coordinator run.
#[derive(Debug, Clone)]
pub struct StageSettings {
    pub timeout: Duration,
    pub workflowrun_name: String,
    pub stage_name: String,
    pub coordinator_container: String,
    pub resolver_container: String,
    pub log_dir: PathBuf,
    pub notify_flag: PathBuf,
    pub log_drain_timeout: Duration,
}

impl StageSettings {
    /// Directory holding this stage's container logs.
    #[must_use]
    pub fn stage_log_dir(&self) -> PathBuf {
        self.log_dir
            .join(&self.workflowrun_name)
            .join(&self.stage_name)
    }

    /// Log file for one container.
    #[must_use]
    pub fn log_path(&self, container: &str) -> PathBuf {
        self.stage_log_dir().join(format!("{container}.log"))
    }
}

/// Phases of a coordinator run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    WaitRunning,
    CollectLogs,
    WaitWorkloadTerminate,
    NotifyResolver,
    WaitAllOthersTerminate,
}

impl Phase {
    /// Phases whose timeout triggers kill escalation.
    #[must_use]
    pub fn escalates_on_timeout(self) -> bool {
        matches!(self, Self::WaitWorkloadTerminate | Self::WaitAllOthersTerminate)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WaitRunning => "WaitRunning",
            Self::CollectLogs => "CollectLogs",
            Self::WaitWorkloadTerminate => "WaitWorkloadTerminate",
            Self::NotifyResolver => "NotifyResolver",
            Self::WaitAllOthersTerminate => "WaitAllOthersTerminate",
        };
        f.write_str(name)
    }
}

/// Terminal state of a coordinator run.
#[derive(Debug)]
pub enum Outcome {
    /// All phases completed.
    Done {
        /// Every workload container exited with code 0.
        workload_succeeded: bool,
    },
    /// A phase failed and no further phase ran.
    Aborted {
        phase: Phase,
        error: CoordinatorError,
        /// Containers a kill was sent to during escalation.
        killed: Vec<String>,
    },
}

impl Outcome {
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

/// Coordinator for a single stage pod.
pub struct StageCoordinator<C> {
    runtime: ContainerRuntime<C>,
    settings: StageSettings,
    log_tasks: JoinSet<()>,
}

impl<C: PodClient + 'static> StageCoordinator<C> {
    #[must_use]
    pub fn new(runtime: ContainerRuntime<C>, settings: StageSettings) -> Self {
        Self {
            runtime,
            settings,
            log_tasks: JoinSet::new(),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &StageSettings {
        &self.settings
    }

    /// Execute every phase, escalate on timeout, then drain log collection.
    pub async fn run(mut self) -> Outcome {
        info!(
            workflowrun = %self.settings.workflowrun_name,
            stage = %self.settings.stage_name,
            timeout_secs = self.settings.timeout.as_secs(),
            "Starting stage coordinator"
        );

        let outcome = match self.run_phases().await {
            Ok(()) => Outcome::Done {
                workload_succeeded: self.workload_succeeded().await,
            },
            Err((phase, error)) => {
                error!(phase = %phase, error = %error, "Stage coordinator phase failed");
                let killed = if phase.escalates_on_timeout() && error.is_timeout() {
                    self.kill_others().await
                } else {
                    Vec::new()
                };
                Outcome::Aborted {
                    phase,
                    error,
                    killed,
                }
            }
        };

        self.drain_logs().await;

        if outcome.is_done() {
            let marker = self.settings.stage_log_dir().join(LOG_EOF_MARKER);
            if let Err(e) = tokio::fs::File::create(&marker).await {
                warn!(path = %marker.display(), error = %e, "Failed to write log end marker");
            }
        }

        match &outcome {
            Outcome::Done { workload_succeeded } => info!(
                workload_succeeded = *workload_succeeded,
                "Stage coordinator finished"
            ),
            Outcome::Aborted { phase, killed, .. } => warn!(
                phase = %phase,
                killed = ?killed,
                "Stage coordinator aborted"
            ),
        }

        outcome
    }

    async fn run_phases(&mut self) -> Result<(), (Phase, CoordinatorError)> {
        self.wait_running()
            .await
            .map_err(|e| (Phase::WaitRunning, e))?;
        self.collect_logs()
            .await
            .map_err(|e| (Phase::CollectLogs, e))?;
        self.wait_workload_terminate()
            .await
            .map_err(|e| (Phase::WaitWorkloadTerminate, e))?;
        self.notify_resolver()
            .await
            .map_err(|e| (Phase::NotifyResolver, e))?;
        self.wait_all_others_terminate()
            .await
            .map_err(|e| (Phase::WaitAllOthersTerminate, e))?;
        Ok(())
    }

    /// Phase 1: wait until every container, sidecars included, has started.
    pub async fn wait_running(&self) -> Result<(), CoordinatorError> {
        self.runtime
            .wait_containers(self.settings.timeout, ContainerState::NotWaiting, &[])
            .await?;
        Ok(())
    }

    /// Phase 2: start one log task per container other than the coordinator.
    ///
    /// Returns the number of tasks started. Tasks run independently; their
    /// failures are logged and never affect other tasks or later phases.
    pub async fn collect_logs(&mut self) -> Result<usize, CoordinatorError> {
        let dir = self.settings.stage_log_dir();
        create_dir(&dir).await?;

        let containers = self.runtime.get_all_containers().await?;
        let coordinator = self.settings.coordinator_container.clone();
        let mut started = 0;
        for container in containers.into_iter().filter(|c| *c != coordinator) {
            let runtime = self.runtime.clone();
            let path = self.settings.log_path(&container);
            self.log_tasks.spawn(async move {
                if let Err(e) = runtime.collect_log(&container, &path).await {
                    error!(container = %container, error = %e, "Collect container log failed");
                }
            });
            started += 1;
        }

        info!(tasks = started, dir = %dir.display(), "Started log collection");
        Ok(started)
    }

    /// Phase 3: wait for every workload container, sidecars excluded.
    pub async fn wait_workload_terminate(&self) -> Result<(), CoordinatorError> {
        self.runtime
            .wait_containers(
                self.settings.timeout,
                ContainerState::Terminated,
                &[
                    self.settings.coordinator_container.as_str(),
                    self.settings.resolver_container.as_str(),
                ],
            )
            .await?;
        Ok(())
    }

    /// Phase 4: create the resolver's marker file.
    ///
    /// Must only run after phase 3 succeeded: the resolver starts pushing
    /// outputs as soon as the file exists.
    pub async fn notify_resolver(&self) -> Result<(), CoordinatorError> {
        let flag = &self.settings.notify_flag;
        if let Some(parent) = flag.parent() {
            create_dir(parent).await?;
        }
        tokio::fs::File::create(flag)
            .await
            .map_err(|source| CoordinatorError::Filesystem {
                path: flag.display().to_string(),
                source,
            })?;
        info!(flag = %flag.display(), "Notified resolver");
        Ok(())
    }

    /// Phase 5: wait for every container except the coordinator itself.
    pub async fn wait_all_others_terminate(&self) -> Result<(), CoordinatorError> {
        self.runtime
            .wait_containers(
                self.settings.timeout,
                ContainerState::Terminated,
                &[self.settings.coordinator_container.as_str()],
            )
            .await?;
        Ok(())
    }

    /// Send a kill to every container except the coordinator. Failures are
    /// logged and swallowed since the pod is being torn down anyway.
    pub async fn kill_others(&self) -> Vec<String> {
        let containers = match self.runtime.get_all_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                error!(error = %e, "Failed to list containers for kill escalation");
                return Vec::new();
            }
        };

        let mut killed = Vec::new();
        for container in containers
            .into_iter()
            .filter(|c| *c != self.settings.coordinator_container)
        {
            if let Err(e) = self.runtime.kill_container(&container).await {
                warn!(container = %container, error = %e, "Kill container failed");
            }
            killed.push(container);
        }
        killed
    }

    async fn workload_succeeded(&self) -> bool {
        let snapshot = match self.runtime.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Failed to read workload exit codes");
                return false;
            }
        };

        let codes = snapshot.exit_codes(&[
            self.settings.coordinator_container.as_str(),
            self.settings.resolver_container.as_str(),
        ]);
        debug!(codes = ?codes, "Workload container exit codes");
        codes.iter().all(|(_, code)| *code == Some(0))
    }

    async fn drain_logs(&mut self) {
        let pending = self.log_tasks.len();
        if pending == 0 {
            return;
        }

        let tasks = &mut self.log_tasks;
        let drained = tokio::time::timeout(self.settings.log_drain_timeout, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Log collection task panicked");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = self.log_tasks.len(),
                "Log streams still open after drain timeout, abandoning them"
            );
            self.log_tasks.abort_all();
        } else {
            debug!(tasks = pending, "All log collection tasks finished");
        }
    }
}

async fn create_dir(path: &Path) -> Result<(), CoordinatorError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| CoordinatorError::Filesystem {
            path: path.display().to_string(),
            source,
        })
}
