//! # Container Runtime Adapter
//!
//! The only part of the coordinator that talks to the cluster. It is scoped to
//! a single pod fixed at construction and offers four operations: wait for the
//! pod's containers to reach a state, list containers, stream a container log
//! into a file, and kill a container.
//!
//! The Kubernetes calls sit behind [`PodClient`] so the poll loop and the phase
//! sequence can run against a scripted pod in tests.

use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, LogParams};
use kube::Client;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::time::MissedTickBehavior;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::{debug, info, warn};

use crate::error::RuntimeError;
use crate::pod::{ContainerState, PodSnapshot, Progress};

/// Fixed interval between pod status polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Byte stream of a container log.
pub type LogStream = Pin<Box<dyn AsyncRead + Send>>;

/// Minimal pod API surface the adapter consumes.
#[async_trait]
pub trait PodClient: Send + Sync {
    /// Fetch the current declared containers and their statuses.
    async fn get_pod(&self) -> Result<PodSnapshot, RuntimeError>;

    /// Open a follow log stream for one container.
    async fn stream_logs(&self, container: &str) -> Result<LogStream, RuntimeError>;

    /// Ask the runtime to terminate one container.
    async fn kill_container(&self, container: &str) -> Result<(), RuntimeError>;
}

/// [`PodClient`] backed by the Kubernetes API.
pub struct KubePodClient {
    pods: Api<Pod>,
    pod_name: String,
    kill_command: Vec<String>,
}

impl KubePodClient {
    #[must_use]
    pub fn new(client: Client, namespace: &str, pod_name: &str) -> Self {
        Self {
            pods: Api::namespaced(client, namespace),
            pod_name: pod_name.to_string(),
            kill_command: vec!["kill".to_string(), "-TERM".to_string(), "1".to_string()],
        }
    }

    /// Command exec'd inside a container to terminate it (default: `kill -TERM 1`).
    #[must_use]
    pub fn with_kill_command(mut self, command: Vec<String>) -> Self {
        if !command.is_empty() {
            self.kill_command = command;
        }
        self
    }
}

#[async_trait]
impl PodClient for KubePodClient {
    async fn get_pod(&self) -> Result<PodSnapshot, RuntimeError> {
        let pod = self.pods.get(&self.pod_name).await?;
        Ok(PodSnapshot::from(&pod))
    }

    async fn stream_logs(&self, container: &str) -> Result<LogStream, RuntimeError> {
        let params = LogParams {
            container: Some(container.to_string()),
            follow: true,
            ..LogParams::default()
        };
        let reader = self.pods.log_stream(&self.pod_name, &params).await?;
        Ok(Box::pin(reader.compat()))
    }

    // Kubernetes has no per-container kill, so this execs a termination
    // command in the container. Images without the command make it fail.
    async fn kill_container(&self, container: &str) -> Result<(), RuntimeError> {
        let params = AttachParams::default().container(container).stdout(false);
        let mut process = self
            .pods
            .exec(&self.pod_name, self.kill_command.clone(), &params)
            .await?;

        let status = process.take_status();
        if let Some(status) = status {
            if let Some(status) = status.await {
                if status.status.as_deref() != Some("Success") {
                    return Err(RuntimeError::Exec {
                        container: container.to_string(),
                        message: status.message.unwrap_or_else(|| "unknown failure".to_string()),
                    });
                }
            }
        }

        process.join().await.map_err(|e| RuntimeError::Exec {
            container: container.to_string(),
            message: e.to_string(),
        })
    }
}

/// Pod-scoped runtime operations built on a [`PodClient`].
pub struct ContainerRuntime<C> {
    client: Arc<C>,
    poll_interval: Duration,
}

impl<C> Clone for ContainerRuntime<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            poll_interval: self.poll_interval,
        }
    }
}

impl<C: PodClient> ContainerRuntime<C> {
    #[must_use]
    pub fn new(client: C) -> Self {
        Self {
            client: Arc::new(client),
            poll_interval: POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Fetch one snapshot of the pod.
    pub async fn snapshot(&self) -> Result<PodSnapshot, RuntimeError> {
        self.client.get_pod().await
    }

    /// Poll the pod until every container outside `excepts` satisfies `state`.
    ///
    /// Returns [`RuntimeError::Timeout`] when the condition does not hold on
    /// any poll before `timeout` elapses, including when a fetch is still in
    /// flight at the deadline. A failed pod fetch ends the wait immediately
    /// with that error.
    pub async fn wait_containers(
        &self,
        timeout: Duration,
        state: ContainerState,
        excepts: &[&str],
    ) -> Result<(), RuntimeError> {
        info!(
            state = %state,
            excepts = ?excepts,
            timeout_secs = timeout.as_secs(),
            "Waiting for pod containers"
        );

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let timed_out = |last: Option<Progress>| {
            let Progress { expected, actual } = last.unwrap_or(Progress { expected: 0, actual: 0 });
            warn!(
                state = %state,
                expected,
                actual,
                "Containers did not reach expected state before timeout"
            );
            RuntimeError::Timeout {
                state,
                timeout,
                expected,
                actual,
            }
        };

        let mut last: Option<Progress> = None;
        loop {
            tokio::select! {
                () = &mut deadline => return Err(timed_out(last)),
                _ = ticker.tick() => {
                    let fetch = tokio::time::timeout_at(deadline.deadline(), self.client.get_pod());
                    let Ok(fetched) = fetch.await else {
                        return Err(timed_out(last));
                    };
                    let snapshot = fetched?;
                    let progress = snapshot.progress(state, excepts);
                    if progress.reached() {
                        info!(
                            state = %state,
                            containers = progress.expected,
                            "All containers reached expected state"
                        );
                        return Ok(());
                    }
                    debug!(
                        state = %state,
                        expected = progress.expected,
                        actual = progress.actual,
                        "Containers not yet in expected state"
                    );
                    last = Some(progress);
                }
            }
        }
    }

    /// Names of every container declared in the pod spec.
    pub async fn get_all_containers(&self) -> Result<Vec<String>, RuntimeError> {
        Ok(self.client.get_pod().await?.containers)
    }

    /// Stream a container's log into a new file at `destination` until the
    /// stream closes. Returns the number of bytes written.
    pub async fn collect_log(
        &self,
        container: &str,
        destination: &Path,
    ) -> Result<u64, RuntimeError> {
        info!(container = %container, path = %destination.display(), "Collecting container log");

        let mut stream = self.client.stream_logs(container).await?;
        let mut file = tokio::fs::File::create(destination).await?;

        let copied = tokio::io::copy(&mut stream, &mut file).await;
        let flushed = file.flush().await;
        drop(file);

        let bytes = copied?;
        flushed?;

        info!(container = %container, bytes, "Container log stream closed");
        Ok(bytes)
    }

    /// Best-effort termination of a single container.
    pub async fn kill_container(&self, container: &str) -> Result<(), RuntimeError> {
        warn!(container = %container, "Killing container");
        self.client.kill_container(container).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::ContainerStatusSnapshot;
    use kube::core::ErrorResponse;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Serves scripted snapshots in order; the last one repeats forever.
    struct ScriptedPod {
        snapshots: Mutex<VecDeque<Result<PodSnapshot, RuntimeError>>>,
        last: Mutex<Option<PodSnapshot>>,
        polls: Mutex<usize>,
        logs: HashMap<String, Vec<u8>>,
    }

    impl ScriptedPod {
        fn new(snapshots: Vec<PodSnapshot>) -> Self {
            Self {
                snapshots: Mutex::new(snapshots.into_iter().map(Ok).collect()),
                last: Mutex::new(None),
                polls: Mutex::new(0),
                logs: HashMap::new(),
            }
        }

        fn polls(&self) -> usize {
            *self.polls.lock().unwrap()
        }
    }

    #[async_trait]
    impl PodClient for ScriptedPod {
        async fn get_pod(&self) -> Result<PodSnapshot, RuntimeError> {
            *self.polls.lock().unwrap() += 1;
            let next = self.snapshots.lock().unwrap().pop_front();
            match next {
                Some(Ok(snapshot)) => {
                    *self.last.lock().unwrap() = Some(snapshot.clone());
                    Ok(snapshot)
                }
                Some(Err(e)) => Err(e),
                None => Ok(self.last.lock().unwrap().clone().unwrap_or_default()),
            }
        }

        async fn stream_logs(&self, container: &str) -> Result<LogStream, RuntimeError> {
            match self.logs.get(container) {
                Some(bytes) => Ok(Box::pin(std::io::Cursor::new(bytes.clone()))),
                None => Err(RuntimeError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no log for {container}"),
                ))),
            }
        }

        async fn kill_container(&self, _container: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
    }

    fn pod(statuses: Vec<ContainerStatusSnapshot>) -> PodSnapshot {
        PodSnapshot {
            containers: statuses.iter().map(|s| s.name.clone()).collect(),
            statuses,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_succeeds_once_all_terminated() {
        let runtime = ContainerRuntime::new(ScriptedPod::new(vec![
            pod(vec![
                ContainerStatusSnapshot::running("build"),
                ContainerStatusSnapshot::running("push"),
            ]),
            pod(vec![
                ContainerStatusSnapshot::terminated("build", 0),
                ContainerStatusSnapshot::running("push"),
            ]),
            pod(vec![
                ContainerStatusSnapshot::terminated("build", 0),
                ContainerStatusSnapshot::terminated("push", 0),
            ]),
        ]));

        runtime
            .wait_containers(Duration::from_secs(60), ContainerState::Terminated, &[])
            .await
            .unwrap();
        assert_eq!(runtime.client().polls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_when_never_converged() {
        let runtime = ContainerRuntime::new(ScriptedPod::new(vec![pod(vec![
            ContainerStatusSnapshot::terminated("build", 0),
            ContainerStatusSnapshot::running("push"),
        ])]));

        let err = runtime
            .wait_containers(Duration::from_secs(5), ContainerState::Terminated, &[])
            .await
            .unwrap_err();

        match err {
            RuntimeError::Timeout {
                expected, actual, ..
            } => {
                assert_eq!(expected, 2);
                assert_eq!(actual, 1);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_counts_latest_poll_only() {
        // build terminates, then the status flips back to running; push only
        // terminates after build is running again, so no poll sees both done.
        let runtime = ContainerRuntime::new(ScriptedPod::new(vec![
            pod(vec![
                ContainerStatusSnapshot::terminated("build", 0),
                ContainerStatusSnapshot::running("push"),
            ]),
            pod(vec![
                ContainerStatusSnapshot::running("build"),
                ContainerStatusSnapshot::terminated("push", 0),
            ]),
        ]));

        let err = runtime
            .wait_containers(Duration::from_millis(5500), ContainerState::Terminated, &[])
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    /// Every fetch hangs far past any wait's timeout.
    struct StalledPod;

    #[async_trait]
    impl PodClient for StalledPod {
        async fn get_pod(&self) -> Result<PodSnapshot, RuntimeError> {
            tokio::time::sleep(Duration::from_secs(300)).await;
            Ok(PodSnapshot::default())
        }

        async fn stream_logs(&self, _container: &str) -> Result<LogStream, RuntimeError> {
            Ok(Box::pin(tokio::io::empty()))
        }

        async fn kill_container(&self, _container: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_deadline_interrupts_hung_fetch() {
        let runtime = ContainerRuntime::new(StalledPod);
        let start = tokio::time::Instant::now();

        let err = runtime
            .wait_containers(Duration::from_secs(10), ContainerState::Terminated, &[])
            .await
            .unwrap_err();

        assert!(err.is_timeout(), "{err:?}");
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(11), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_aborts_on_transport_error() {
        let scripted = ScriptedPod::new(vec![]);
        scripted
            .snapshots
            .lock()
            .unwrap()
            .push_back(Err(RuntimeError::KubeError(kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: "etcd unavailable".to_string(),
                reason: "InternalError".to_string(),
                code: 500,
            }))));
        let runtime = ContainerRuntime::new(scripted);

        let err = runtime
            .wait_containers(Duration::from_secs(60), ContainerState::NotWaiting, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::KubeError(_)));
        assert_eq!(runtime.client().polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_respects_excepts() {
        let runtime = ContainerRuntime::new(ScriptedPod::new(vec![pod(vec![
            ContainerStatusSnapshot::running("coordinator"),
            ContainerStatusSnapshot::terminated("build", 0),
            ContainerStatusSnapshot::waiting("resolver"),
        ])]));

        runtime
            .wait_containers(
                Duration::from_secs(10),
                ContainerState::Terminated,
                &["coordinator", "resolver"],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_collect_log_writes_bytes_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let mut scripted = ScriptedPod::new(vec![]);
        scripted
            .logs
            .insert("build".to_string(), b"step 1\nstep 2\n\x00raw".to_vec());
        let runtime = ContainerRuntime::new(scripted);

        let path = dir.path().join("build.log");
        let bytes = runtime.collect_log("build", &path).await.unwrap();

        assert_eq!(bytes, 18);
        assert_eq!(std::fs::read(&path).unwrap(), b"step 1\nstep 2\n\x00raw");
    }

    #[tokio::test]
    async fn test_collect_log_stream_error_creates_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = ContainerRuntime::new(ScriptedPod::new(vec![]));

        let path = dir.path().join("missing.log");
        assert!(runtime.collect_log("missing", &path).await.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_get_all_containers() {
        let runtime = ContainerRuntime::new(ScriptedPod::new(vec![pod(vec![
            ContainerStatusSnapshot::running("coordinator"),
            ContainerStatusSnapshot::running("build"),
        ])]));
        assert_eq!(
            runtime.get_all_containers().await.unwrap(),
            vec!["coordinator".to_string(), "build".to_string()]
        );
    }
}
