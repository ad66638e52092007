use crate::domain::models::FollowRecord;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AtprotoError {
    #[error("HTTP request failed with status {status}: {message}")]
    RequestFailed { status: StatusCode, message: String },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
pub struct FollowsPage {
    #[serde(default)]
    pub follows: Vec<FollowRecord>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileView {
    pub did: String,
    pub handle: String,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    #[serde(rename = "followersCount", default)]
    pub followers_count: Option<i64>,
}

/// Thin XRPC client over the AppView HTTP API. One instance per task; the
/// optional bearer token is attached to every request when configured.
pub struct AtprotoClient {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl AtprotoClient {
    pub fn new(base_url: &str, access_token: Option<String>) -> Result<Self, AtprotoError> {
        let client = Client::builder()
            .user_agent(crate::user_agent())
            .gzip(true)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    /// One page of `actor`'s outgoing follows.
    pub async fn get_follows(
        &self,
        actor: &str,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<FollowsPage, AtprotoError> {
        let url = format!("{}/xrpc/app.bsky.graph.getFollows", self.base_url);

        let mut request = self
            .client
            .get(&url)
            .query(&[("actor", actor), ("limit", &limit.to_string())]);

        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!("getFollows failed for {}: {} {}", actor, status, message);
            return Err(AtprotoError::RequestFailed { status, message });
        }

        Ok(response.json().await?)
    }

    pub async fn get_profile(&self, actor: &str) -> Result<ProfileView, AtprotoError> {
        let url = format!("{}/xrpc/app.bsky.actor.getProfile", self.base_url);

        let mut request = self.client.get(&url).query(&[("actor", actor)]);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!("getProfile failed for {}: {} {}", actor, status, message);
            return Err(AtprotoError::RequestFailed { status, message });
        }

        Ok(response.json().await?)
    }
}
