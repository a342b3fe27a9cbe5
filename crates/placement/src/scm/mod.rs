//! SCM providers that manage repository webhooks.

mod github;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::integration::{ScmSource, ScmType};

pub use github::GitHubProvider;

#[derive(Error, Debug)]
pub enum ScmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SCM API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid SCM credentials: {0}")]
    InvalidCredentials(String),

    #[error("SCM type {0} is not supported")]
    Unsupported(String),
}

/// Repository events a webhook subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Push,
    TagRelease,
    PullRequest,
    PullRequestComment,
}

impl EventType {
    /// Events every trigger webhook subscribes to.
    pub const ALL: [Self; 4] = [
        Self::Push,
        Self::TagRelease,
        Self::PullRequest,
        Self::PullRequestComment,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Webhook {
    pub url: String,
    pub events: Vec<EventType>,
}

#[async_trait]
pub trait ScmProvider: Send + Sync {
    async fn create_webhook(&self, repo: &str, webhook: &Webhook) -> Result<(), ScmError>;

    /// Delete the webhook of `repo` pointing at `url`. Missing hooks are not an error.
    async fn delete_webhook(&self, repo: &str, url: &str) -> Result<(), ScmError>;
}

/// Build the provider for an SCM integration.
pub fn provider_for(source: &ScmSource) -> Result<Arc<dyn ScmProvider>, ScmError> {
    match source.kind {
        ScmType::GitHub => Ok(Arc::new(GitHubProvider::for_server(
            &source.server,
            &source.token,
        )?)),
        ref other => Err(ScmError::Unsupported(format!("{other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_github_is_supported() {
        let source = |kind| ScmSource {
            kind,
            server: "https://scm.example.com".to_string(),
            token: "t0k".to_string(),
        };

        assert!(provider_for(&source(ScmType::GitHub)).is_ok());
        assert!(matches!(
            provider_for(&source(ScmType::GitLab)),
            Err(ScmError::Unsupported(kind)) if kind == "GitLab"
        ));
    }
}
