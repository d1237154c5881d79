//! REST handlers: health, message history, and the contact list.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use aurelay_protocol::ChatMessage;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::store::User;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub sender_id: i64,
    pub receiver_id: i64,
}

/// GET /chat/messages?sender_id=<id>&receiver_id=<id>
///
/// Full conversation between the pair, both directions, ordered by `sent_at`
/// ascending. Used once at screen mount and again after every reconnect.
pub async fn get_messages(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    if params.sender_id == params.receiver_id {
        return Err(ApiError::bad_request("sender and receiver must differ"));
    }
    let messages = state
        .messages
        .conversation_between(params.sender_id, params.receiver_id)
        .await?;
    Ok(Json(messages))
}

/// GET /chat/users/{user_id}
///
/// All users except the caller, i.e. the contact list the chat overview
/// screen renders.
pub async fn get_users(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<Vec<User>>> {
    let users = state.users.list_contacts(user_id).await?;
    Ok(Json(users))
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// POST /chat/users
pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<Json<User>> {
    let username = req.username.trim();
    if username.is_empty() {
        return Err(ApiError::bad_request("username must not be empty"));
    }
    let user = state
        .users
        .create(username, req.avatar_url.as_deref())
        .await?;
    Ok(Json(user))
}
