use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::{
    models::{RoomIdentity, RoomModel},
    policy::ClosurePolicy,
    repository::{CloseOutcome, RecordOutcome, RoomRepository},
};
use crate::shared::AppError;

/// Service for room registry business rules
pub struct RoomService {
    repository: Arc<dyn RoomRepository + Send + Sync>,
    policy: ClosurePolicy,
}

impl RoomService {
    pub fn new(repository: Arc<dyn RoomRepository + Send + Sync>, policy: ClosurePolicy) -> Self {
        Self { repository, policy }
    }

    pub fn policy(&self) -> ClosurePolicy {
        self.policy
    }

    /// Opens a direct chat for an approved chat request
    #[instrument(skip(self))]
    pub async fn create_direct_chat(
        &self,
        first: &str,
        second: &str,
    ) -> Result<RoomModel, AppError> {
        let (first, second) = (first.trim(), second.trim());
        if first.is_empty() || second.is_empty() {
            return Err(AppError::BadRequest(
                "Participant ids must not be empty".to_string(),
            ));
        }
        if first == second {
            return Err(AppError::BadRequest(
                "A direct chat needs two distinct participants".to_string(),
            ));
        }

        let room = self
            .repository
            .create_or_get_room(&RoomIdentity::direct_chat(first, second))
            .await?;
        info!(room_id = %room.id, "Direct chat opened");
        Ok(room)
    }

    /// Returns the discussion for `topic`, creating it on first reference
    #[instrument(skip(self))]
    pub async fn get_or_create_discussion(&self, topic: &str) -> Result<RoomModel, AppError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(AppError::InvalidContent(
                "Discussion topic must not be empty".to_string(),
            ));
        }

        self.repository
            .create_or_get_room(&RoomIdentity::discussion(topic))
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_room(&self, room_id: &str) -> Result<RoomModel, AppError> {
        self.repository
            .get_room(room_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Room {room_id} not found")))
    }

    /// Like `get_room`, but `Forbidden` unless `user_id` may read the room
    #[instrument(skip(self))]
    pub async fn get_readable_room(&self, room_id: &str, user_id: &str) -> Result<RoomModel, AppError> {
        let room = self.get_room(room_id).await?;
        if !room.can_read(user_id) {
            warn!(room_id = %room_id, user_id = %user_id, "Room access refused");
            return Err(AppError::Forbidden(format!(
                "{user_id} may not access room {room_id}"
            )));
        }
        Ok(room)
    }

    #[instrument(skip(self))]
    pub async fn list_rooms(&self) -> Result<Vec<RoomModel>, AppError> {
        let rooms = self.repository.list_rooms().await?;
        debug!(room_count = rooms.len(), "Rooms listed");
        Ok(rooms)
    }

    #[instrument(skip(self))]
    pub async fn add_participant(&self, room_id: &str, user_id: &str) -> Result<RoomModel, AppError> {
        self.repository.add_participant(room_id, user_id).await
    }

    /// Counts one message against the configured closure policy
    #[instrument(skip(self))]
    pub async fn record_message(
        &self,
        room_id: &str,
        sender_id: &str,
    ) -> Result<RecordOutcome, AppError> {
        self.repository
            .record_message(room_id, sender_id, &self.policy)
            .await
    }

    #[instrument(skip(self))]
    pub async fn rollback_message(&self, room_id: &str, sender_id: &str) -> Result<(), AppError> {
        self.repository.rollback_message(room_id, sender_id).await
    }

    #[instrument(skip(self))]
    pub async fn close_room(&self, room_id: &str) -> Result<CloseOutcome, AppError> {
        self.repository.close_room(room_id).await
    }
}
