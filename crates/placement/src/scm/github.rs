//! GitHub webhook management over the REST API.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{EventType, ScmError, ScmProvider, Webhook};

const GITHUB_API: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("stagehand-placement/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct CreateHook<'a> {
    name: &'static str,
    active: bool,
    events: Vec<&'static str>,
    config: HookConfig<'a>,
}

#[derive(Serialize)]
struct HookConfig<'a> {
    url: &'a str,
    content_type: &'static str,
}

#[derive(Deserialize)]
struct Hook {
    id: u64,
    #[serde(default)]
    config: HookInfo,
}

#[derive(Deserialize, Default)]
struct HookInfo {
    #[serde(default)]
    url: Option<String>,
}

fn event_name(event: EventType) -> &'static str {
    match event {
        EventType::Push => "push",
        EventType::TagRelease => "release",
        EventType::PullRequest => "pull_request",
        EventType::PullRequestComment => "issue_comment",
    }
}

pub struct GitHubProvider {
    http: Client,
    api_base: String,
}

impl GitHubProvider {
    /// Provider talking to `api_base` directly.
    pub fn new(api_base: &str, token: &str) -> Result<Self, ScmError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        if !token.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ScmError::InvalidCredentials(e.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    /// Provider for an integration's server: github.com maps to the public
    /// API, anything else is treated as GitHub Enterprise.
    pub fn for_server(server: &str, token: &str) -> Result<Self, ScmError> {
        let server = server.trim_end_matches('/');
        let api_base = match server {
            "" | "https://github.com" | "http://github.com" | GITHUB_API => GITHUB_API.to_string(),
            enterprise => format!("{enterprise}/api/v3"),
        };
        Self::new(&api_base, token)
    }

    #[must_use]
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn hooks_url(&self, repo: &str) -> String {
        format!("{}/repos/{repo}/hooks", self.api_base)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ScmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ScmError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ScmProvider for GitHubProvider {
    async fn create_webhook(&self, repo: &str, webhook: &Webhook) -> Result<(), ScmError> {
        let mut events: Vec<&'static str> = webhook.events.iter().copied().map(event_name).collect();
        events.dedup();

        let body = CreateHook {
            name: "web",
            active: true,
            events,
            config: HookConfig {
                url: &webhook.url,
                content_type: "json",
            },
        };

        let response = self.http.post(self.hooks_url(repo)).json(&body).send().await?;
        Self::check(response).await?;
        info!(repo = %repo, url = %webhook.url, "Created GitHub webhook");
        Ok(())
    }

    async fn delete_webhook(&self, repo: &str, url: &str) -> Result<(), ScmError> {
        let response = self.http.get(self.hooks_url(repo)).send().await?;
        let hooks: Vec<Hook> = Self::check(response).await?.json().await?;

        let Some(hook) = hooks
            .into_iter()
            .find(|h| h.config.url.as_deref() == Some(url))
        else {
            debug!(repo = %repo, url = %url, "No GitHub webhook to delete");
            return Ok(());
        };

        let response = self
            .http
            .delete(format!("{}/{}", self.hooks_url(repo), hook.id))
            .send()
            .await?;
        Self::check(response).await?;
        info!(repo = %repo, hook_id = hook.id, "Deleted GitHub webhook");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_server_maps_api_base() {
        assert_eq!(
            GitHubProvider::for_server("https://github.com/", "").unwrap().api_base(),
            "https://api.github.com"
        );
        assert_eq!(
            GitHubProvider::for_server("https://ghe.acme.io", "").unwrap().api_base(),
            "https://ghe.acme.io/api/v3"
        );
    }

    #[test]
    fn test_event_names() {
        let names: Vec<_> = EventType::ALL.into_iter().map(event_name).collect();
        assert_eq!(names, ["push", "release", "pull_request", "issue_comment"]);
    }
}
