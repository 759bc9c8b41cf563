use crate::api::AppState;
use crate::api::middleware::AuthUser;
use crate::domain::thread::Thread;
use crate::error::Result;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateThreadBody {
    pub participants: Vec<Uuid>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

pub async fn create_thread(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(body): Json<CreateThreadBody>,
) -> Result<(StatusCode, Json<Thread>)> {
    let thread = state.messaging.create_thread(body.participants, body.metadata, identity.tier).await?;
    Ok((StatusCode::CREATED, Json(thread)))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
}

pub async fn list_threads(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Thread>>> {
    let threads = state.messaging.get_user_threads(identity.id, params.limit).await?;
    Ok(Json(threads))
}

pub async fn get_thread(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(thread_id): Path<Uuid>,
) -> Result<Json<Thread>> {
    let thread = state.messaging.get_thread(thread_id, identity.id).await?;
    Ok(Json(thread))
}

#[derive(Debug, Deserialize)]
pub struct MessagesParams {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub before: Option<OffsetDateTime>,
    pub limit: Option<i64>,
}

pub async fn thread_messages(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(thread_id): Path<Uuid>,
    Query(params): Query<MessagesParams>,
) -> Result<Json<Vec<crate::domain::message::Message>>> {
    let messages =
        state.messaging.get_thread_messages(thread_id, identity.id, params.before, params.limit).await?;
    Ok(Json(messages))
}

pub async fn mark_thread_read(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(thread_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let receipts = state.messaging.mark_thread_as_read(thread_id, identity.id).await?;
    Ok(Json(serde_json::json!({ "receipts": receipts })))
}

pub async fn archive_thread(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(thread_id): Path<Uuid>,
) -> Result<Json<Thread>> {
    let thread = state.messaging.archive_thread(thread_id, identity.id).await?;
    Ok(Json(thread))
}

pub async fn unarchive_thread(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(thread_id): Path<Uuid>,
) -> Result<Json<Thread>> {
    let thread = state.messaging.unarchive_thread(thread_id, identity.id).await?;
    Ok(Json(thread))
}

pub async fn delete_thread(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(thread_id): Path<Uuid>,
) -> Result<StatusCode> {
    state.messaging.delete_thread(thread_id, identity.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
