use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use tracing::{info, instrument, warn};

use super::types::{DirectChatRequest, RoomResponse};
use crate::identity::Identity;
use crate::shared::{AppError, AppState};

/// HTTP handler for opening a direct chat from an approved chat request
///
/// POST /rooms/direct
#[instrument(name = "create_direct_room", skip(state, identity))]
pub async fn create_direct_room(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<DirectChatRequest>,
) -> Result<(StatusCode, Json<RoomResponse>), AppError> {
    let [first, second] = request.participants.as_slice() else {
        warn!(count = request.participants.len(), "Direct chat needs exactly two participants");
        return Err(AppError::BadRequest(
            "participants must hold exactly two user ids".to_string(),
        ));
    };

    let room = state.room_service.create_direct_chat(first, second).await?;
    info!(room_id = %room.id, requested_by = %identity.user_id, "Direct chat created via HTTP");

    Ok((StatusCode::CREATED, Json(room.into())))
}

/// HTTP handler resolving a discussion topic to its room
///
/// POST /discussions/:topic
#[instrument(name = "get_or_create_discussion", skip(state))]
pub async fn get_or_create_discussion(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> Result<Json<RoomResponse>, AppError> {
    let room = state.room_service.get_or_create_discussion(&topic).await?;
    Ok(Json(room.into()))
}

/// GET /rooms/:room_id
#[instrument(name = "get_room", skip(state, identity))]
pub async fn get_room(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomResponse>, AppError> {
    let room = state
        .room_service
        .get_readable_room(&room_id, &identity.user_id)
        .await?;
    Ok(Json(room.into()))
}

/// Administrative close; live subscribers receive `room-closed`.
/// Direct chats can only be closed by their participants.
///
/// POST /rooms/:room_id/close
#[instrument(name = "close_room", skip(state, identity))]
pub async fn close_room(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomResponse>, AppError> {
    state
        .room_service
        .get_readable_room(&room_id, &identity.user_id)
        .await?;
    let room = state.chat_service.close_room(&room_id).await?;
    info!(room_id = %room_id, closed_by = %identity.user_id, "Room closed via HTTP");
    Ok(Json(room.into()))
}

#[cfg(test)]
mod tests {
    use crate::build_router;
    use crate::room::models::{RoomKind, RoomStatus};
    use crate::room::types::RoomResponse;
    use crate::shared::test_utils::AppStateBuilder;
    use crate::shared::AppState;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
    };
    use chrono::Duration;
    use tower::ServiceExt; // for `oneshot`

    fn token(state: &AppState, user_id: &str) -> String {
        state
            .identity
            .issue_token(user_id, Duration::hours(1))
            .unwrap()
    }

    async fn call(state: &AppState, method: &str, uri: &str, user: Option<&str>, body: &str) -> Response {
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(user) = user {
            request = request.header("authorization", format!("Bearer {}", token(state, user)));
        }

        build_router(state.clone())
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap()
    }

    async fn read_room(response: Response) -> RoomResponse {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_create_direct_room_handler() {
        let state = AppStateBuilder::new().build();

        let response = call(
            &state,
            "POST",
            "/rooms/direct",
            Some("moderator"),
            r#"{"participants": ["alice", "bob"]}"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let room = read_room(response).await;
        assert_eq!(room.kind, RoomKind::DirectChat);
        assert_eq!(room.participants, vec!["alice", "bob"]);
        assert_eq!(room.status, RoomStatus::Open);

        let duplicate = call(
            &state,
            "POST",
            "/rooms/direct",
            Some("moderator"),
            r#"{"participants": ["bob", "alice"]}"#,
        )
        .await;
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_create_direct_room_rejects_wrong_arity() {
        let state = AppStateBuilder::new().build();
        let response = call(
            &state,
            "POST",
            "/rooms/direct",
            Some("moderator"),
            r#"{"participants": ["alice"]}"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_requests_without_token_are_unauthorized() {
        let state = AppStateBuilder::new().build();
        let response = call(
            &state,
            "POST",
            "/rooms/direct",
            None,
            r#"{"participants": ["alice", "bob"]}"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_discussion_handler_is_idempotent() {
        let state = AppStateBuilder::new().build();

        let first = read_room(call(&state, "POST", "/discussions/sports", Some("alice"), "").await).await;
        let second = read_room(call(&state, "POST", "/discussions/sports", Some("bob"), "").await).await;

        assert_eq!(first.id, second.id);
        assert_eq!(first.topic.as_deref(), Some("sports"));
    }

    #[tokio::test]
    async fn test_blank_topic_is_rejected() {
        let state = AppStateBuilder::new().build();
        let response = call(&state, "POST", "/discussions/%20%20", Some("alice"), "").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_room_access() {
        let state = AppStateBuilder::new().build();
        let room = state
            .room_service
            .create_direct_chat("alice", "bob")
            .await
            .unwrap();
        let uri = format!("/rooms/{}", room.id);

        assert_eq!(call(&state, "GET", &uri, Some("alice"), "").await.status(), StatusCode::OK);
        assert_eq!(
            call(&state, "GET", &uri, Some("mallory"), "").await.status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            call(&state, "GET", "/rooms/missing", Some("alice"), "").await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_close_room_handler() {
        let state = AppStateBuilder::new().build();
        let room = state
            .room_service
            .get_or_create_discussion("sports")
            .await
            .unwrap();
        let uri = format!("/rooms/{}/close", room.id);

        let closed = read_room(call(&state, "POST", &uri, Some("admin"), "").await).await;
        assert_eq!(closed.status, RoomStatus::Closed);
        assert!(closed.closed_at.is_some());

        let again = read_room(call(&state, "POST", &uri, Some("admin"), "").await).await;
        assert_eq!(again.closed_at, closed.closed_at);
    }

    #[tokio::test]
    async fn test_outsider_cannot_close_direct_chat() {
        let state = AppStateBuilder::new().build();
        let room = state
            .room_service
            .create_direct_chat("alice", "bob")
            .await
            .unwrap();
        let uri = format!("/rooms/{}/close", room.id);

        let refused = call(&state, "POST", &uri, Some("mallory"), "").await;
        assert_eq!(refused.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            state.room_service.get_room(&room.id).await.unwrap().status,
            RoomStatus::Open
        );

        let closed = read_room(call(&state, "POST", &uri, Some("bob"), "").await).await;
        assert_eq!(closed.status, RoomStatus::Closed);
    }
}
