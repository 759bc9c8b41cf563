use crate::api::AppState;
use crate::api::middleware::AuthUser;
use crate::domain::message::{Message, NewMessage};
use crate::error::{AppError, Result};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use uuid::Uuid;

pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(data): Json<NewMessage>,
) -> Result<(StatusCode, Json<Message>)> {
    // The payload names a sender; it must be the authenticated caller.
    if data.sender_id != identity.id {
        return Err(AppError::Authorization("sender does not match the authenticated user".to_string()));
    }

    let message = state.messaging.send_message(data, identity.tier).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_message_read(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(message_id): Path<Uuid>,
) -> Result<Json<Message>> {
    let message = state.messaging.mark_message_as_read(message_id, identity.id).await?;
    Ok(Json(message))
}

#[derive(Debug, Deserialize)]
pub struct ReactionBody {
    pub emoji: String,
}

pub async fn add_reaction(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(message_id): Path<Uuid>,
    Json(body): Json<ReactionBody>,
) -> Result<Json<Message>> {
    let message = state.messaging.add_reaction(message_id, identity.id, &body.emoji).await?;
    Ok(Json(message))
}

pub async fn delete_message(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(message_id): Path<Uuid>,
) -> Result<Json<Message>> {
    let message = state.messaging.delete_message(message_id, identity.id).await?;
    Ok(Json(message))
}

pub async fn unread_count(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<Json<serde_json::Value>> {
    let unread = state.messaging.get_unread_count(identity.id).await?;
    Ok(Json(serde_json::json!({ "unread": unread })))
}
