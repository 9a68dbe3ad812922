//! GitHub REST implementation of [`ItemGateway`].
//!
//! Authenticates with a token from `GITHUB_TOKEN`, pages through issues and
//! pull requests on demand, and retries idempotent calls on transient
//! failures.

use crate::gateway::{GatewayError, GatewayFuture, ItemGateway};
use crate::item::{Item, ItemKind, ItemState, Label, LabelSpec, StateFilter};
use anyhow::{Context, Result};
use futures::stream::{self, BoxStream, StreamExt};
use git2::Repository;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

// ============================================================================
// Connection settings
// ============================================================================

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const API_TIMEOUT_SECS: u64 = 60;
const API_VERSION: &str = "2022-11-28";
const PER_PAGE: usize = 100;

/// Maximum length for error body content in error messages
const MAX_ERROR_BODY_LEN: usize = 200;

/// Read the API token from the environment. Empty values count as unset.
pub fn get_token() -> Option<String> {
    std::env::var("GITHUB_TOKEN")
        .ok()
        .filter(|token| !token.trim().is_empty())
}

/// API base URL, overridable for GitHub Enterprise via `GITHUB_API_URL`.
pub fn api_base_url() -> String {
    std::env::var("GITHUB_API_URL")
        .ok()
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string())
}

/// Sanitize an API error body to prevent credential leakage.
/// Truncates long responses and redacts potential secrets.
fn sanitize_error_body(body: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "token",
        "secret",
        "password",
        "credential",
        "bearer",
        "ghp_",
        "gho_",
        "ghs_",
        "github_pat_",
    ];

    let truncated = if body.chars().count() > MAX_ERROR_BODY_LEN {
        let head: String = body.chars().take(MAX_ERROR_BODY_LEN).collect();
        format!("{}... (truncated)", head)
    } else {
        body.to_string()
    };

    let lower = truncated.to_lowercase();
    if SECRET_PATTERNS.iter().any(|p| lower.contains(p)) {
        return "(error details redacted - may contain sensitive data)".to_string();
    }

    truncated
}

// ============================================================================
// Repository discovery
// ============================================================================

/// Parse `owner/name`.
pub fn parse_repository(full_name: &str) -> Option<(String, String)> {
    let (owner, repo) = full_name.trim().split_once('/')?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

/// Extract owner and repo from a git remote URL.
///
/// Supports:
/// - git@github.com:owner/repo.git
/// - https://github.com/owner/repo.git
/// - https://github.com/owner/repo
pub fn parse_remote_url(url: &str) -> Option<(String, String)> {
    if let Some(rest) = url.strip_prefix("git@github.com:") {
        let path = rest.trim_end_matches(".git");
        let parts: Vec<&str> = path.splitn(2, '/').collect();
        if parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty() {
            return Some((parts[0].to_string(), parts[1].to_string()));
        }
        return None;
    }

    if let Ok(parsed) = Url::parse(url) {
        if parsed.host_str() != Some("github.com") {
            return None;
        }
        let path = parsed
            .path()
            .trim_start_matches('/')
            .trim_end_matches('/')
            .trim_end_matches(".git");
        let parts: Vec<&str> = path.splitn(2, '/').collect();
        if parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty() {
            return Some((parts[0].to_string(), parts[1].to_string()));
        }
    }

    None
}

/// Get the owner and repo from the repository's remotes.
pub fn get_remote_info(repo_path: &Path) -> Result<(String, String)> {
    let repo = Repository::discover(repo_path).context("Failed to open repository")?;

    for remote_name in ["origin", "upstream", "github"] {
        if let Ok(remote) = repo.find_remote(remote_name) {
            if let Some(found) = remote.url().and_then(parse_remote_url) {
                return Ok(found);
            }
        }
    }

    if let Ok(remotes) = repo.remotes() {
        for name in remotes.iter().flatten() {
            if let Ok(remote) = repo.find_remote(name) {
                if let Some(found) = remote.url().and_then(parse_remote_url) {
                    return Ok(found);
                }
            }
        }
    }

    Err(anyhow::anyhow!(
        "No GitHub remote found. Set REPOSITORY=owner/name or pass --repo"
    ))
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Deserialize)]
struct ApiErrorResponse {
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
    code: Option<String>,
}

#[derive(Deserialize)]
struct RawLabel {
    name: String,
}

/// Issue or pull request as listed by the API. `labels` is required:
/// records without it are reported as malformed.
#[derive(Deserialize)]
struct RawItem {
    number: u64,
    title: String,
    body: Option<String>,
    labels: Vec<RawLabel>,
    state: ItemState,
    pull_request: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct CreateLabelRequest<'a> {
    name: &'a str,
    color: &'a str,
    description: &'a str,
}

#[derive(Serialize)]
struct AddLabelsRequest<'a> {
    labels: [&'a str; 1],
}

#[derive(Serialize)]
struct CreateCommentRequest<'a> {
    body: &'a str,
}

#[derive(Serialize)]
struct UpdateStateRequest {
    state: &'static str,
}

/// Convert one listed record into an [`Item`].
///
/// `listed_as` is the endpoint's kind; the issues endpoint also returns pull
/// requests, marked by a `pull_request` key.
fn parse_item(value: serde_json::Value, listed_as: ItemKind) -> Result<Item, GatewayError> {
    let number = value.get("number").and_then(|n| n.as_u64());
    let raw: RawItem = serde_json::from_value(value).map_err(|e| GatewayError::MalformedItem {
        number,
        reason: e.to_string(),
    })?;

    let kind = match listed_as {
        ItemKind::PullRequest => ItemKind::PullRequest,
        ItemKind::Issue if raw.pull_request.as_ref().is_some_and(|v| !v.is_null()) => {
            ItemKind::PullRequest
        }
        ItemKind::Issue => ItemKind::Issue,
    };

    Ok(Item {
        number: raw.number,
        title: raw.title,
        body: raw.body,
        labels: raw.labels.into_iter().map(|l| l.name).collect(),
        state: raw.state,
        kind,
    })
}

/// Turn a non-success response into a [`GatewayError`].
async fn error_from_response(resp: Response) -> GatewayError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();

    if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(&body) {
        let detail = api_error
            .errors
            .first()
            .and_then(|e| e.message.clone().or_else(|| e.code.clone()))
            .unwrap_or_default();
        let message = if detail.is_empty() {
            api_error.message
        } else {
            format!("{}: {}", api_error.message, detail)
        };
        return GatewayError::Api {
            status: status.as_u16(),
            message,
        };
    }

    GatewayError::Api {
        status: status.as_u16(),
        message: sanitize_error_body(&body),
    }
}

// ============================================================================
// Retry
// ============================================================================

/// Whether a request may be safely repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Idempotency {
    /// Repeating has no additional effect (reads, label add, state change).
    Safe,
    /// Repeating could duplicate the effect (comment creation). Only
    /// retried when the request never reached the server.
    Unsafe,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn is_retryable_error(err: &reqwest::Error, idempotency: Idempotency) -> bool {
    match idempotency {
        Idempotency::Safe => err.is_connect() || err.is_timeout(),
        Idempotency::Unsafe => err.is_connect(),
    }
}

// ============================================================================
// Gateway
// ============================================================================

pub struct GitHubGateway {
    client: reqwest::Client,
    api_base: Url,
    owner: String,
    repo: String,
    token: String,
    retry: RetryPolicy,
}

impl GitHubGateway {
    pub fn new(api_base: &str, owner: &str, repo: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .user_agent(concat!("issue-dedup/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        let api_base = Url::parse(api_base)
            .with_context(|| format!("Invalid GitHub API URL: {}", api_base))?;
        if api_base.cannot_be_a_base() {
            anyhow::bail!("Invalid GitHub API URL: {}", api_base);
        }

        Ok(Self {
            client,
            api_base,
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: token.to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// `{base}/repos/{owner}/{repo}/{segments...}` with each segment encoded.
    fn repo_url(&self, segments: &[&str]) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .push("repos")
                .push(&self.owner)
                .push(&self.repo)
                .extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("Authorization", format!("Bearer {}", self.token))
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    /// Send a request built by `build`, retrying transient failures.
    ///
    /// Returns the final response whatever its status; callers decide what
    /// a non-success status means.
    async fn send<F>(&self, idempotency: Idempotency, build: F) -> Result<Response, GatewayError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 1;
        loop {
            match build().send().await {
                Ok(resp)
                    if is_retryable_status(resp.status())
                        && idempotency == Idempotency::Safe
                        && attempt < self.retry.max_attempts =>
                {
                    tracing::debug!(status = %resp.status(), attempt, "retrying GitHub request");
                }
                Ok(resp) => return Ok(resp),
                Err(err)
                    if is_retryable_error(&err, idempotency)
                        && attempt < self.retry.max_attempts =>
                {
                    tracing::debug!(error = %err, attempt, "retrying GitHub request");
                }
                Err(err) => return Err(err.into()),
            }
            tokio::time::sleep(self.retry.delay(attempt)).await;
            attempt += 1;
        }
    }

    async fn expect_success(&self, resp: Response) -> Result<Response, GatewayError> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(error_from_response(resp).await)
        }
    }

    async fn get_label(&self, name: &str) -> Result<Option<Label>, GatewayError> {
        let url = self.repo_url(&["labels", name]);
        let resp = self
            .send(Idempotency::Safe, || self.request(Method::GET, url.clone()))
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = self.expect_success(resp).await?;
        let label = resp
            .json::<Label>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        Ok(Some(label))
    }

    async fn create_label(&self, spec: &LabelSpec) -> Result<Option<Label>, GatewayError> {
        let url = self.repo_url(&["labels"]);
        let body = CreateLabelRequest {
            name: &spec.name,
            color: spec.color,
            description: spec.description,
        };
        let resp = self
            .send(Idempotency::Safe, || {
                self.request(Method::POST, url.clone()).json(&body)
            })
            .await?;
        // Another writer created it between our read and our create.
        if resp.status() == StatusCode::UNPROCESSABLE_ENTITY {
            return Ok(None);
        }
        let resp = self.expect_success(resp).await?;
        let label = resp
            .json::<Label>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        Ok(Some(label))
    }

    async fn fetch_page(
        &self,
        kind: ItemKind,
        filter: StateFilter,
        page: u32,
    ) -> Result<Vec<serde_json::Value>, GatewayError> {
        let endpoint = match kind {
            ItemKind::Issue => "issues",
            ItemKind::PullRequest => "pulls",
        };
        let mut url = self.repo_url(&[endpoint]);
        url.query_pairs_mut()
            .append_pair("state", filter.as_str())
            .append_pair("sort", "created")
            .append_pair("direction", "desc")
            .append_pair("per_page", &PER_PAGE.to_string())
            .append_pair("page", &page.to_string());

        let resp = self
            .send(Idempotency::Safe, || self.request(Method::GET, url.clone()))
            .await?;
        let resp = self.expect_success(resp).await?;
        resp.json::<Vec<serde_json::Value>>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

/// Pagination cursor for [`GitHubGateway::list_items`].
enum PageCursor {
    Next(u32),
    Done,
}

impl ItemGateway for GitHubGateway {
    fn verify_access(&self) -> GatewayFuture<'_, ()> {
        Box::pin(async move {
            let url = self.repo_url(&[]);
            let resp = self
                .send(Idempotency::Safe, || self.request(Method::GET, url.clone()))
                .await
                .map_err(|e| GatewayError::Connection(e.to_string()))?;
            match resp.status() {
                s if s.is_success() => Ok(()),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                    let err = error_from_response(resp).await;
                    Err(GatewayError::Connection(format!(
                        "cannot access {}: {}",
                        self.full_name(),
                        err
                    )))
                }
                _ => Err(error_from_response(resp).await),
            }
        })
    }

    fn ensure_label<'a>(&'a self, spec: &'a LabelSpec) -> GatewayFuture<'a, Label> {
        Box::pin(async move {
            if let Some(label) = self.get_label(&spec.name).await? {
                return Ok(label);
            }
            if let Some(label) = self.create_label(spec).await? {
                tracing::info!(label = %spec.name, "created label");
                return Ok(label);
            }
            self.get_label(&spec.name)
                .await?
                .ok_or_else(|| GatewayError::NotFound(format!("label '{}'", spec.name)))
        })
    }

    fn add_label<'a>(&'a self, number: u64, label: &'a str) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let url = self.repo_url(&["issues", &number.to_string(), "labels"]);
            let body = AddLabelsRequest { labels: [label] };
            let resp = self
                .send(Idempotency::Safe, || {
                    self.request(Method::POST, url.clone()).json(&body)
                })
                .await?;
            self.expect_success(resp).await?;
            Ok(())
        })
    }

    fn add_comment<'a>(&'a self, number: u64, body: &'a str) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let url = self.repo_url(&["issues", &number.to_string(), "comments"]);
            let request = CreateCommentRequest { body };
            let resp = self
                .send(Idempotency::Unsafe, || {
                    self.request(Method::POST, url.clone()).json(&request)
                })
                .await?;
            self.expect_success(resp).await?;
            Ok(())
        })
    }

    fn set_state(&self, number: u64, state: ItemState) -> GatewayFuture<'_, ()> {
        Box::pin(async move {
            let url = self.repo_url(&["issues", &number.to_string()]);
            let request = UpdateStateRequest {
                state: state.as_str(),
            };
            let resp = self
                .send(Idempotency::Safe, || {
                    self.request(Method::PATCH, url.clone()).json(&request)
                })
                .await?;
            self.expect_success(resp).await?;
            Ok(())
        })
    }

    fn list_items(
        &self,
        kind: ItemKind,
        filter: StateFilter,
    ) -> BoxStream<'_, Result<Item, GatewayError>> {
        stream::unfold(PageCursor::Next(1), move |cursor| async move {
            let page = match cursor {
                PageCursor::Next(page) => page,
                PageCursor::Done => return None,
            };
            match self.fetch_page(kind, filter, page).await {
                Ok(values) => {
                    let next = if values.len() < PER_PAGE {
                        PageCursor::Done
                    } else {
                        PageCursor::Next(page + 1)
                    };
                    let items: Vec<_> = values.into_iter().map(|v| parse_item(v, kind)).collect();
                    Some((stream::iter(items), next))
                }
                Err(err) => Some((stream::iter(vec![Err(err)]), PageCursor::Done)),
            }
        })
        .flatten()
        .boxed()
    }
}

// ============================================================================
// Tests
// ============================================================================
