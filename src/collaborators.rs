//! # Collaborators — Boundary Contracts for External Services
//!
//! The engine never talks to a social platform directly. It consumes three
//! capabilities through async traits so the browser-automation or REST client
//! behind them can be swapped without touching orchestration code:
//!
//! | Trait | Contract |
//! |-------|----------|
//! | [`PostSource`] | per tracked page, the posts currently visible |
//! | [`ActionSink`] | perform one like or comment, report `completed`/`failed` |
//! | [`SessionStatus`] | whether an account currently holds a valid session |
//!
//! [`SidecarClient`] implements all three against an HTTP automation sidecar.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::models::{ActionType, Platform, TrackedPage};

// ── Contracts ───────────────────────────────────────────────────

/// One post reported by the polling collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolledPost {
    pub external_post_id: String,
    pub url: String,
    #[serde(default)]
    pub content_text: Option<String>,
}

#[async_trait]
pub trait PostSource: Send + Sync {
    async fn fetch_recent(&self, page: &TrackedPage) -> Result<Vec<PolledPost>>;
}

#[derive(Debug, Clone, Serialize)]
pub struct SinkRequest {
    pub user_id: Uuid,
    pub platform: Platform,
    /// Canonical post URL.
    pub target_post_ref: String,
    pub external_post_id: String,
    pub action_type: ActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SinkResult {
    pub status: SinkStatus,
    #[serde(default)]
    pub error_class: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl SinkResult {
    pub fn completed() -> Self {
        SinkResult {
            status: SinkStatus::Completed,
            error_class: None,
            error_message: None,
        }
    }

    pub fn failed(class: Option<&str>, message: &str) -> Self {
        SinkResult {
            status: SinkStatus::Failed,
            error_class: class.map(str::to_string),
            error_message: Some(message.to_string()),
        }
    }
}

/// Executes likes and comments. A transport error from `execute` is treated
/// like a `transient_network` failure.
#[async_trait]
pub trait ActionSink: Send + Sync {
    async fn execute(&self, request: &SinkRequest) -> Result<SinkResult>;
}

#[async_trait]
pub trait SessionStatus: Send + Sync {
    async fn is_authenticated(&self, user_id: Uuid, platform: Platform) -> Result<bool>;
}

// ── HTTP sidecar client ─────────────────────────────────────────

#[derive(Serialize)]
struct RecentPostsPayload<'a> {
    page_id: Uuid,
    platform: Platform,
    url: &'a str,
    external_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct RecentPostsResponse {
    #[serde(default)]
    posts: Vec<PolledPost>,
}

#[derive(Deserialize)]
struct SessionResponse {
    authenticated: bool,
}

/// Client for the browser-automation sidecar.
pub struct SidecarClient {
    base_url: String,
    http: reqwest::Client,
}

impl SidecarClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(SidecarClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(anyhow!("sidecar {} error ({}): {}", what, status, body))
    }
}

#[async_trait]
impl PostSource for SidecarClient {
    async fn fetch_recent(&self, page: &TrackedPage) -> Result<Vec<PolledPost>> {
        let url = format!("{}/posts/recent", self.base_url);
        debug!(page_id = %page.id, "Sidecar recent-posts request");
        let response = self
            .http
            .post(&url)
            .json(&RecentPostsPayload {
                page_id: page.id,
                platform: page.platform,
                url: &page.url,
                external_id: page.external_id.as_deref(),
            })
            .send()
            .await?;
        let body: RecentPostsResponse = Self::check(response, "recent-posts").await?.json().await?;
        Ok(body.posts)
    }
}

#[async_trait]
impl ActionSink for SidecarClient {
    async fn execute(&self, request: &SinkRequest) -> Result<SinkResult> {
        let url = format!("{}/actions", self.base_url);
        debug!(user_id = %request.user_id, action = %request.action_type, "Sidecar action request");
        let response = self.http.post(&url).json(request).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Ok(SinkResult::failed(Some("rate_limited"), "sidecar returned 429"));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(SinkResult::failed(Some("auth_expired"), "sidecar returned 401"));
        }
        Ok(Self::check(response, "action").await?.json().await?)
    }
}

#[async_trait]
impl SessionStatus for SidecarClient {
    async fn is_authenticated(&self, user_id: Uuid, platform: Platform) -> Result<bool> {
        let url = format!("{}/sessions/{}/{}", self.base_url, user_id, platform);
        let response = self.http.get(&url).send().await?;
        let body: SessionResponse = Self::check(response, "session").await?.json().await?;
        Ok(body.authenticated)
    }
}
