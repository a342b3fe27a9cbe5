//! Pod status snapshots and the container readiness predicate.
//!
//! Everything here is pure: a [`PodSnapshot`] is taken from one poll of the pod
//! API and [`PodSnapshot::progress`] decides whether the containers reached the
//! expected state. The poll loop in [`crate::runtime`] only repeats it.

use std::collections::HashMap;
use std::fmt;

use k8s_openapi::api::core::v1::Pod;

/// Container state a wait can target. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// The container left the waiting phase: it is running or already terminated.
    NotWaiting,
    /// The runtime reports the container as terminated.
    Terminated,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotWaiting => write!(f, "not-waiting"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Live status of one container as reported on a single poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerStatusSnapshot {
    pub name: String,
    pub running: bool,
    pub terminated: bool,
    pub exit_code: Option<i32>,
}

impl ContainerStatusSnapshot {
    #[must_use]
    pub fn waiting(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn running(name: &str) -> Self {
        Self {
            name: name.to_string(),
            running: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn terminated(name: &str, exit_code: i32) -> Self {
        Self {
            name: name.to_string(),
            terminated: true,
            exit_code: Some(exit_code),
            ..Self::default()
        }
    }

    /// Whether this status satisfies the expected state.
    #[must_use]
    pub fn satisfies(&self, state: ContainerState) -> bool {
        match state {
            ContainerState::NotWaiting => self.running || self.terminated,
            ContainerState::Terminated => self.terminated,
        }
    }
}

/// Declared containers and their statuses from one poll of the pod.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodSnapshot {
    /// Container names in pod spec order.
    pub containers: Vec<String>,
    pub statuses: Vec<ContainerStatusSnapshot>,
}

/// Expected vs. observed container counts for one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub expected: usize,
    pub actual: usize,
}

impl Progress {
    #[must_use]
    pub fn reached(&self) -> bool {
        self.actual >= self.expected
    }
}

impl PodSnapshot {
    #[must_use]
    pub fn status(&self, container: &str) -> Option<&ContainerStatusSnapshot> {
        self.statuses.iter().find(|s| s.name == container)
    }

    /// Count the containers outside `excepts` and how many of them satisfy `state`.
    ///
    /// Excepted names that the pod does not declare are ignored. Only this
    /// snapshot is considered, so a container that flaps back out of the state
    /// between polls is not counted.
    #[must_use]
    pub fn progress(&self, state: ContainerState, excepts: &[&str]) -> Progress {
        let statuses: HashMap<&str, &ContainerStatusSnapshot> =
            self.statuses.iter().map(|s| (s.name.as_str(), s)).collect();

        let mut expected = 0;
        let mut actual = 0;
        for name in &self.containers {
            if excepts.contains(&name.as_str()) {
                continue;
            }
            expected += 1;
            if statuses
                .get(name.as_str())
                .is_some_and(|status| status.satisfies(state))
            {
                actual += 1;
            }
        }

        Progress { expected, actual }
    }

    /// Exit codes of terminated containers outside `excepts`.
    #[must_use]
    pub fn exit_codes(&self, excepts: &[&str]) -> Vec<(String, Option<i32>)> {
        self.containers
            .iter()
            .filter(|name| !excepts.contains(&name.as_str()))
            .map(|name| {
                let code = self
                    .status(name)
                    .filter(|s| s.terminated)
                    .and_then(|s| s.exit_code);
                (name.clone(), code)
            })
            .collect()
    }
}

impl From<&Pod> for PodSnapshot {
    fn from(pod: &Pod) -> Self {
        let containers = pod
            .spec
            .as_ref()
            .map(|spec| spec.containers.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default();

        let statuses = pod
            .status
            .as_ref()
            .and_then(|status| status.container_statuses.as_ref())
            .map(|statuses| {
                statuses
                    .iter()
                    .map(|cs| {
                        let state = cs.state.as_ref();
                        let terminated = state.and_then(|s| s.terminated.as_ref());
                        ContainerStatusSnapshot {
                            name: cs.name.clone(),
                            running: state.is_some_and(|s| s.running.is_some()),
                            terminated: terminated.is_some(),
                            exit_code: terminated.map(|t| t.exit_code),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            containers,
            statuses,
        }
    }
}
