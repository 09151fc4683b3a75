use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use tracing::{info, instrument};

use super::models::MessageModel;
use crate::identity::Identity;
use crate::shared::{AppError, AppState};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub since_id: Option<i64>,
}

/// Backfill endpoint
///
/// GET /rooms/:room_id/messages?since_id=
#[instrument(name = "list_messages", skip(state, identity))]
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageModel>>, AppError> {
    let messages = state
        .chat_service
        .history(&room_id, &identity.user_id, query.since_id)
        .await?;
    Ok(Json(messages))
}

/// Closes the room if still open, then deletes its history. Direct chats
/// can only be purged by their participants.
///
/// DELETE /rooms/:room_id
#[instrument(name = "purge_room", skip(state, identity))]
pub async fn purge_room(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state
        .room_service
        .get_readable_room(&room_id, &identity.user_id)
        .await?;
    let deleted = state.chat_service.purge_room(&room_id).await?;
    info!(room_id = %room_id, deleted, purged_by = %identity.user_id, "Room history purged via HTTP");
    Ok(StatusCode::NO_CONTENT)
}
