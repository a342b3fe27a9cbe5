//! Error types for the container runtime adapter and the coordinator.

use std::time::Duration;

use kube::Error as KubeError;
use thiserror::Error;

use crate::pod::ContainerState;

/// Errors raised while talking to the pod API or streaming logs.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] KubeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(
        "Timed out after {timeout:?} waiting for containers to be {state}: {actual}/{expected} ready"
    )]
    Timeout {
        state: ContainerState,
        timeout: Duration,
        expected: usize,
        actual: usize,
    },

    #[error("Exec in container {container} failed: {message}")]
    Exec { container: String, message: String },
}

impl RuntimeError {
    /// Whether this error is a convergence timeout rather than a transport failure.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Errors that end a coordinator run.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Failed to create {path}: {source}")]
    Filesystem {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CoordinatorError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Runtime(e) if e.is_timeout())
    }
}
