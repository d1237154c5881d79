//! HTTP client for the relay's request/response endpoints.

use aurelay_protocol::ChatMessage;
use serde::Deserialize;
use thiserror::Error;

/// Errors from the relay's HTTP surface.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// A contact-list entry.
#[derive(Debug, Clone, Deserialize)]
pub struct Contact {
    pub user_id: i64,
    pub username: String,
    pub avatar_url: Option<String>,
}

/// Client for the relay's history and contact endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// `base_url` is the relay's HTTP origin, e.g. `http://127.0.0.1:4000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the full conversation between `user_id` and `peer_id`, ordered
    /// by `sent_at` ascending.
    pub async fn fetch_history(
        &self,
        user_id: i64,
        peer_id: i64,
    ) -> Result<Vec<ChatMessage>, ClientError> {
        let url = format!(
            "{}/chat/messages?sender_id={user_id}&receiver_id={peer_id}",
            self.base_url
        );
        let response = self.http.get(&url).send().await?;
        Self::check(response).await?.json().await.map_err(Into::into)
    }

    /// Fetch the contact list for `user_id` (all other users).
    pub async fn fetch_contacts(&self, user_id: i64) -> Result<Vec<Contact>, ClientError> {
        let url = format!("{}/chat/users/{user_id}", self.base_url);
        let response = self.http.get(&url).send().await?;
        Self::check(response).await?.json().await.map_err(Into::into)
    }

    /// Register a user.
    pub async fn create_user(&self, username: &str) -> Result<Contact, ClientError> {
        let url = format!("{}/chat/users", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "username": username }))
            .send()
            .await?;
        Self::check(response).await?.json().await.map_err(Into::into)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ClientError::Status { status, body })
        }
    }
}
