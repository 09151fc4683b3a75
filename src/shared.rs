use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::broker::FanoutBroker;
use crate::chat::ChatService;
use crate::config::AppConfig;
use crate::identity::IdentityConfig;
use crate::message::store::MessageStore;
use crate::room::{policy::ClosurePolicy, repository::RoomRepository, service::RoomService};

/// Shared application state containing all dependencies
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub identity: IdentityConfig,
    pub room_service: Arc<RoomService>,
    pub message_store: Arc<dyn MessageStore + Send + Sync>,
    pub broker: Arc<FanoutBroker>,
    pub chat_service: ChatService,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        room_repository: Arc<dyn RoomRepository + Send + Sync>,
        message_store: Arc<dyn MessageStore + Send + Sync>,
    ) -> Self {
        let identity = IdentityConfig::new(config.jwt_secret.clone());
        let room_service = Arc::new(RoomService::new(
            room_repository,
            ClosurePolicy::new(config.closure_threshold),
        ));
        let broker = Arc::new(FanoutBroker::new());
        let chat_service = ChatService::new(
            Arc::clone(&room_service),
            Arc::clone(&message_store),
            Arc::clone(&broker),
            config.max_message_length,
        );

        Self {
            config: Arc::new(config),
            identity,
            room_service,
            message_store,
            broker,
            chat_service,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not a participant of room {0}")]
    NotAParticipant(String),

    #[error("Room {0} is closed")]
    RoomClosed(String),

    #[error("Invalid content: {0}")]
    InvalidContent(String),

    #[error("Duplicate room: {0}")]
    DuplicateRoom(String),

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error")]
    Internal,
}

impl AppError {
    /// Stable code carried by `error` events on the wire
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Forbidden(_) | AppError::NotAParticipant(_) => "FORBIDDEN",
            AppError::RoomClosed(_) => "ROOM_CLOSED",
            AppError::InvalidContent(_) => "INVALID_CONTENT",
            AppError::DuplicateRoom(_) => "DUPLICATE_ROOM",
            AppError::TransportFailure(_) => "TRANSPORT_FAILURE",
            AppError::PersistenceFailure(_) => "PERSISTENCE_FAILURE",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Internal => "INTERNAL",
        }
    }

    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::PersistenceFailure(_))
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) | AppError::NotAParticipant(_) => StatusCode::FORBIDDEN,
            AppError::RoomClosed(_) | AppError::DuplicateRoom(_) => StatusCode::CONFLICT,
            AppError::InvalidContent(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PersistenceFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::TransportFailure(_) | AppError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Row not found".to_string()),
            other => {
                warn!(error = %other, "Database operation failed");
                AppError::PersistenceFailure(other.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
            "retryable": self.is_retryable(),
        }));

        (status, body).into_response()
    }
}

/// Turns a poisoned lock into an internal error instead of propagating the panic
pub(crate) fn poisoned<T>(_: T) -> AppError {
    AppError::Internal
}

#[cfg(test)]
pub mod test_utils {
    use super::*;
    use crate::message::{models::MessageModel, store::InMemoryMessageStore};
    use crate::room::models::{RoomIdentity, RoomModel};
    use crate::room::repository::{CloseOutcome, InMemoryRoomRepository, RecordOutcome};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Message store that fails the first `failures` appends, then delegates
    pub struct FlakyMessageStore {
        inner: InMemoryMessageStore,
        remaining_failures: AtomicU32,
    }

    impl FlakyMessageStore {
        pub fn new(failures: u32) -> Self {
            Self {
                inner: InMemoryMessageStore::new(),
                remaining_failures: AtomicU32::new(failures),
            }
        }
    }

    #[async_trait]
    impl MessageStore for FlakyMessageStore {
        async fn append(
            &self,
            room_id: &str,
            sender_id: &str,
            content: &str,
        ) -> Result<MessageModel, AppError> {
            let should_fail = self
                .remaining_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if should_fail {
                return Err(AppError::PersistenceFailure("disk on fire".to_string()));
            }
            self.inner.append(room_id, sender_id, content).await
        }

        async fn list_messages(
            &self,
            room_id: &str,
            since_id: Option<i64>,
        ) -> Result<Vec<MessageModel>, AppError> {
            self.inner.list_messages(room_id, since_id).await
        }

        async fn delete_room_history(&self, room_id: &str) -> Result<u64, AppError> {
            self.inner.delete_room_history(room_id).await
        }
    }

    /// Room registry whose next `failures` closes fail, then delegates
    pub struct FlakyRoomRepository {
        inner: InMemoryRoomRepository,
        remaining_close_failures: AtomicU32,
    }

    impl FlakyRoomRepository {
        pub fn failing_closes(failures: u32) -> Self {
            Self {
                inner: InMemoryRoomRepository::new(),
                remaining_close_failures: AtomicU32::new(failures),
            }
        }
    }

    #[async_trait]
    impl RoomRepository for FlakyRoomRepository {
        async fn create_or_get_room(&self, identity: &RoomIdentity) -> Result<RoomModel, AppError> {
            self.inner.create_or_get_room(identity).await
        }

        async fn get_room(&self, room_id: &str) -> Result<Option<RoomModel>, AppError> {
            self.inner.get_room(room_id).await
        }

        async fn list_rooms(&self) -> Result<Vec<RoomModel>, AppError> {
            self.inner.list_rooms().await
        }

        async fn add_participant(&self, room_id: &str, user_id: &str) -> Result<RoomModel, AppError> {
            self.inner.add_participant(room_id, user_id).await
        }

        async fn record_message(
            &self,
            room_id: &str,
            sender_id: &str,
            policy: &ClosurePolicy,
        ) -> Result<RecordOutcome, AppError> {
            self.inner.record_message(room_id, sender_id, policy).await
        }

        async fn rollback_message(&self, room_id: &str, sender_id: &str) -> Result<(), AppError> {
            self.inner.rollback_message(room_id, sender_id).await
        }

        async fn close_room(&self, room_id: &str) -> Result<CloseOutcome, AppError> {
            let should_fail = self
                .remaining_close_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if should_fail {
                return Err(AppError::PersistenceFailure("registry unavailable".to_string()));
            }
            self.inner.close_room(room_id).await
        }
    }

    /// Builder for creating AppState with overrides for testing
    pub struct AppStateBuilder {
        config: AppConfig,
        room_repository: Option<Arc<dyn RoomRepository + Send + Sync>>,
        message_store: Option<Arc<dyn MessageStore + Send + Sync>>,
    }

    impl AppStateBuilder {
        pub fn new() -> Self {
            Self {
                config: AppConfig::default(),
                room_repository: None,
                message_store: None,
            }
        }

        pub fn with_config(mut self, config: AppConfig) -> Self {
            self.config = config;
            self
        }

        pub fn with_room_repository(
            mut self,
            repo: Arc<dyn RoomRepository + Send + Sync>,
        ) -> Self {
            self.room_repository = Some(repo);
            self
        }

        pub fn with_message_store(mut self, store: Arc<dyn MessageStore + Send + Sync>) -> Self {
            self.message_store = Some(store);
            self
        }

        pub fn build(self) -> AppState {
            AppState::new(
                self.config,
                self.room_repository
                    .unwrap_or_else(|| Arc::new(InMemoryRoomRepository::new())),
                self.message_store
                    .unwrap_or_else(|| Arc::new(InMemoryMessageStore::new())),
            )
        }
    }

    impl Default for AppStateBuilder {
        fn default() -> Self {
            Self::new()
        }
    }
}
