//! Access to the forum platform's post and comment APIs.
//!
//! Everything the engine knows about the outside world goes through the
//! [`Gateway`] trait: creating posts, creating comments, and listing the
//! comments under a post. The polling engine, the timer synchronizer, and
//! the publisher all depend on the trait, never on the HTTP client behind
//! it, which keeps them testable against in-memory doubles.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::constants::SYNC_USER_AGENT;

/// A comment as fetched from the forum platform.
///
/// Immutable once fetched; the platform remains the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawComment {
    pub id: String,
    pub author: String,
    pub parent_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub permalink: String,
}

/// The narrow slice of the forum platform the engine is allowed to use.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Create a new post in the given target (e.g. a community name).
    /// Returns the new post's identifier.
    async fn create_post(&self, title: &str, body: &str, target: &str) -> Result<String>;

    /// Create a comment under the given post or comment.
    /// Returns the new comment's identifier.
    async fn create_comment(&self, parent_id: &str, body: &str) -> Result<String>;

    /// List comments under a post, optionally restricted to those created
    /// after `since`.
    async fn list_comments(
        &self,
        post_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawComment>>;
}

#[derive(Debug, Serialize)]
struct CreatePostRequest<'a> {
    title: &'a str,
    body: &'a str,
    target: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateCommentRequest<'a> {
    parent_id: &'a str,
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    id: String,
}

/// HTTP implementation of [`Gateway`] against the forum's JSON API.
#[derive(Debug, Clone)]
pub struct ForumGateway {
    client: reqwest::Client,
    base_url: url::Url,
    api_token: Option<String>,
}

impl ForumGateway {
    /// Create a gateway from the application configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let base_url =
            url::Url::parse(&config.forum_base_url).context("Invalid forum base URL")?;
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .user_agent(SYNC_USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            api_token: config.forum_api_token.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<url::Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Invalid API path: {path}"))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn post_json<T: Serialize + Sync>(&self, path: &str, payload: &T) -> Result<String> {
        let endpoint = self.endpoint(path)?;
        let response = self
            .authorize(self.client.post(endpoint))
            .json(payload)
            .send()
            .await
            .with_context(|| format!("Request to {path} failed"))?;

        let status = response.status();
        if !status.is_success() {
            // 429 lands here too; the poller treats it like any other
            // transient failure.
            anyhow::bail!("{path} returned status {status}");
        }

        let created: CreatedResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {path} response"))?;
        Ok(created.id)
    }
}

#[async_trait]
impl Gateway for ForumGateway {
    async fn create_post(&self, title: &str, body: &str, target: &str) -> Result<String> {
        debug!(title = %title, target = %target, "Creating post");
        self.post_json("api/posts", &CreatePostRequest { title, body, target })
            .await
    }

    async fn create_comment(&self, parent_id: &str, body: &str) -> Result<String> {
        debug!(parent_id = %parent_id, "Creating comment");
        self.post_json("api/comments", &CreateCommentRequest { parent_id, body })
            .await
    }

    async fn list_comments(
        &self,
        post_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawComment>> {
        let mut endpoint = self.endpoint(&format!("api/posts/{post_id}/comments"))?;
        if let Some(since) = since {
            endpoint
                .query_pairs_mut()
                .append_pair("since", &since.to_rfc3339());
        }

        let response = self
            .authorize(self.client.get(endpoint))
            .send()
            .await
            .context("Failed to fetch comments")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Comment listing for {post_id} returned status {status}");
        }

        let comments: Vec<RawComment> = response
            .json()
            .await
            .context("Failed to parse comment listing")?;

        debug!(post_id = %post_id, count = comments.len(), "Fetched comments");
        Ok(comments)
    }
}
