//! REST management surface for conversations.
//!
//! Every route carries `Authorization: Bearer <jwt>` and the token's user must
//! own the `{user_id}` path segment.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use vigil_core::auth::Claims;
use vigil_core::ids::{ConversationId, ThreadId, UserId};
use vigil_store::{ConversationRow, MessageRow};

use crate::auth::bearer_token;
use crate::error::ApiError;
use crate::server::AppState;

const DEFAULT_PAGE: u32 = 50;
const MAX_PAGE: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateConversation {
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub message: String,
    pub conversation_id: ConversationId,
    pub thread_id: ThreadId,
    pub messages_deleted: usize,
    pub checkpoints_cleaned: bool,
}

fn authorize(state: &AppState, headers: &HeaderMap, user_id: UserId) -> Result<Claims, ApiError> {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let claims = state.verifier.verify(bearer_token(header)?)?;
    claims
        .ensure_user(user_id)
        .map_err(|e| ApiError::Forbidden(e.to_string()))?;
    Ok(claims)
}

/// Load a conversation and check it belongs to `user_id`.
fn owned_conversation(
    state: &AppState,
    user_id: UserId,
    conversation_id: ConversationId,
) -> Result<ConversationRow, ApiError> {
    let row = state.store.conversations().get(conversation_id)?;
    if row.user_id != user_id {
        return Err(ApiError::Forbidden(format!(
            "conversation {conversation_id} belongs to another user"
        )));
    }
    Ok(row)
}

pub async fn list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<UserId>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ConversationRow>>, ApiError> {
    authorize(&state, &headers, user_id)?;
    let limit = params.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let rows = state
        .store
        .conversations()
        .list_for_user(user_id, limit, params.offset.unwrap_or(0))?;
    Ok(Json(rows))
}

/// The body is optional; an empty body creates an untitled conversation.
pub async fn create_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<UserId>,
    body: Bytes,
) -> Result<(StatusCode, Json<ConversationRow>), ApiError> {
    authorize(&state, &headers, user_id)?;
    let request: CreateConversation = if body.is_empty() {
        CreateConversation::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };

    let title = request.title.as_deref().map(str::trim).filter(|t| !t.is_empty());
    let resolved = state.coordinator.resolve(user_id, None, title)?;
    let row = state.store.conversations().get(resolved.conversation_id)?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((user_id, conversation_id)): Path<(UserId, ConversationId)>,
) -> Result<Json<ConversationRow>, ApiError> {
    authorize(&state, &headers, user_id)?;
    Ok(Json(owned_conversation(&state, user_id, conversation_id)?))
}

pub async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((user_id, conversation_id)): Path<(UserId, ConversationId)>,
) -> Result<Json<Vec<MessageRow>>, ApiError> {
    authorize(&state, &headers, user_id)?;
    owned_conversation(&state, user_id, conversation_id)?;
    Ok(Json(state.store.messages().list(conversation_id)?))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((user_id, conversation_id)): Path<(UserId, ConversationId)>,
) -> Result<Json<DeleteResponse>, ApiError> {
    authorize(&state, &headers, user_id)?;
    let report = state.cascade.delete(conversation_id, user_id).await?;
    Ok(Json(DeleteResponse {
        message: "Conversation deleted successfully".into(),
        conversation_id: report.conversation_id,
        thread_id: report.thread_id,
        messages_deleted: report.messages_deleted,
        checkpoints_cleaned: report.checkpoints_deleted.is_some(),
    }))
}

