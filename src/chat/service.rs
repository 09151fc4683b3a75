use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use super::lanes::RoomLanes;
use crate::broker::{ConnectionHandle, FanoutBroker, SubscriptionHandle};
use crate::message::{models::MessageModel, store::MessageStore};
use crate::room::models::{RoomKind, RoomModel, RoomStatus};
use crate::room::service::RoomService;
use crate::shared::AppError;
use crate::websockets::ServerMessage;

const CLOSE_ATTEMPTS: u32 = 3;
const CLOSE_RETRY_DELAY: Duration = Duration::from_millis(25);

/// How a join ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// History replayed, live events follow
    Subscribed(SubscriptionHandle),
    /// History replayed followed by `room-closed`; nothing live will follow
    ReadOnly,
}

/// Room-scoped chat operations shared by every connection.
///
/// Everything that writes a room's log or emits its events runs under that
/// room's lane, so subscribers observe one ordered stream per room.
#[derive(Clone)]
pub struct ChatService {
    rooms: Arc<RoomService>,
    messages: Arc<dyn MessageStore + Send + Sync>,
    broker: Arc<FanoutBroker>,
    lanes: Arc<RoomLanes>,
    max_message_length: usize,
}

impl ChatService {
    pub fn new(
        rooms: Arc<RoomService>,
        messages: Arc<dyn MessageStore + Send + Sync>,
        broker: Arc<FanoutBroker>,
        max_message_length: usize,
    ) -> Self {
        Self {
            rooms,
            messages,
            broker,
            lanes: Arc::new(RoomLanes::new()),
            max_message_length,
        }
    }

    /// Checks membership, subscribes `connection` and replays history to it.
    #[instrument(skip(self, connection), fields(connection_id = %connection.id()))]
    pub async fn join(
        &self,
        room_id: &str,
        user_id: &str,
        connection: &ConnectionHandle,
        since_id: Option<i64>,
    ) -> Result<JoinOutcome, AppError> {
        let _lane = self.lanes.acquire(room_id).await?;

        let mut room = self.rooms.get_room(room_id).await?;
        if room.status == RoomStatus::Closing {
            self.settle_pending_close(room_id).await;
            room = self.rooms.get_room(room_id).await?;
        }
        match room.kind {
            RoomKind::DirectChat if !room.has_participant(user_id) => {
                warn!(room_id = %room_id, user_id = %user_id, "Join refused for non-participant");
                return Err(AppError::Forbidden(format!(
                    "{user_id} is not a participant of room {room_id}"
                )));
            }
            RoomKind::Discussion if room.accepts_messages() => {
                match self.rooms.add_participant(room_id, user_id).await {
                    Ok(updated) => room = updated,
                    Err(AppError::RoomClosed(_)) => {
                        room = self.rooms.get_room(room_id).await?;
                    }
                    Err(e) => return Err(e),
                }
            }
            _ => {}
        }

        let subscription = if room.accepts_messages() {
            match self.broker.subscribe(room_id, connection.clone()) {
                Ok(handle) => Some(handle),
                Err(AppError::RoomClosed(_)) => None,
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let replayed = self
            .messages
            .list_messages(room_id, since_id)
            .await
            .and_then(|messages| {
                let count = messages.len();
                connection.deliver(ServerMessage::RoomHistory {
                    room_id: room_id.to_string(),
                    messages,
                })?;
                if subscription.is_none() {
                    connection.deliver(ServerMessage::RoomClosed {
                        room_id: room_id.to_string(),
                    })?;
                }
                Ok(count)
            });

        let replayed = match replayed {
            Ok(count) => count,
            Err(e) => {
                if let Some(handle) = &subscription {
                    self.broker.unsubscribe(handle)?;
                }
                return Err(e);
            }
        };

        info!(
            room_id = %room_id,
            user_id = %user_id,
            replayed,
            live = subscription.is_some(),
            "Joined room"
        );
        Ok(match subscription {
            Some(handle) => JoinOutcome::Subscribed(handle),
            None => JoinOutcome::ReadOnly,
        })
    }

    /// Accepts one message: count, persist, publish, and close the room if
    /// this message reached the threshold.
    ///
    /// The unit runs on its own task, so dropping the caller (a connection
    /// going away) cannot stop it between counting and persisting.
    #[instrument(skip(self, content))]
    pub async fn send(
        &self,
        room_id: &str,
        sender_id: &str,
        content: String,
    ) -> Result<MessageModel, AppError> {
        self.validate_content(&content)?;

        let service = self.clone();
        let room_id = room_id.to_string();
        let sender_id = sender_id.to_string();

        tokio::spawn(async move {
            let _lane = service.lanes.acquire(&room_id).await?;
            service.send_unit(&room_id, &sender_id, &content).await
        })
        .await
        .map_err(|e| {
            error!(error = %e, "Send task did not complete");
            AppError::Internal
        })?
    }

    fn validate_content(&self, content: &str) -> Result<(), AppError> {
        if content.trim().is_empty() {
            return Err(AppError::InvalidContent(
                "Message content must not be empty".to_string(),
            ));
        }
        let length = content.chars().count();
        if length > self.max_message_length {
            return Err(AppError::InvalidContent(format!(
                "Message is {length} characters, limit is {}",
                self.max_message_length
            )));
        }
        Ok(())
    }

    async fn send_unit(
        &self,
        room_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<MessageModel, AppError> {
        let outcome = match self.rooms.record_message(room_id, sender_id).await {
            Ok(outcome) => outcome,
            Err(e @ AppError::RoomClosed(_)) => {
                self.settle_pending_close(room_id).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let message = match self.messages.append(room_id, sender_id, content).await {
            Ok(message) => message,
            Err(e) => {
                warn!(room_id = %room_id, sender_id = %sender_id, error = %e, "Append failed, rolling back count");
                if let Err(rollback) = self.rooms.rollback_message(room_id, sender_id).await {
                    error!(room_id = %room_id, error = %rollback, "Rollback failed");
                }
                return Err(e);
            }
        };

        self.broker.publish(room_id, &message)?;
        debug!(
            room_id = %room_id,
            message_id = message.id,
            count = outcome.new_count,
            "Message accepted"
        );

        if outcome.should_close {
            self.complete_closure(room_id).await?;
        }

        Ok(message)
    }

    /// Closes a room whose policy just fired, retrying a failed registry
    /// close a few times. Subscribers are told in every case since a Closing
    /// room already refuses writes.
    async fn complete_closure(&self, room_id: &str) -> Result<(), AppError> {
        let mut attempt = 1;
        loop {
            match self.rooms.close_room(room_id).await {
                Ok(_) => break,
                Err(e) if attempt < CLOSE_ATTEMPTS => {
                    warn!(room_id = %room_id, attempt, error = %e, "Close failed, retrying");
                    tokio::time::sleep(CLOSE_RETRY_DELAY * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    // Left Closing; the next send or join on the room retries
                    error!(room_id = %room_id, error = %e, "Failed to close room after threshold");
                    break;
                }
            }
        }
        self.broker.broadcast_closure(room_id)?;
        Ok(())
    }

    /// Finishes a close an earlier send unit could not complete. Only called
    /// under the room's lane, where a Closing room has no send in flight.
    async fn settle_pending_close(&self, room_id: &str) {
        match self.rooms.get_room(room_id).await {
            Ok(room) if room.status == RoomStatus::Closing => {}
            _ => return,
        }
        match self.rooms.close_room(room_id).await {
            Ok(_) => info!(room_id = %room_id, "Pending closure completed"),
            Err(e) => warn!(room_id = %room_id, error = %e, "Pending closure still failing"),
        }
        if let Err(e) = self.broker.broadcast_closure(room_id) {
            warn!(room_id = %room_id, error = %e, "Closure broadcast failed");
        }
    }

    pub fn is_subscribed(&self, subscription: &SubscriptionHandle) -> bool {
        self.broker.is_subscribed(subscription).unwrap_or(false)
    }

    pub fn leave(&self, subscription: &SubscriptionHandle) -> Result<bool, AppError> {
        self.broker.unsubscribe(subscription)
    }

    /// Administrative close; subscribers get `room-closed`
    #[instrument(skip(self))]
    pub async fn close_room(&self, room_id: &str) -> Result<RoomModel, AppError> {
        let _lane = self.lanes.acquire(room_id).await?;
        self.close_under_lane(room_id).await
    }

    async fn close_under_lane(&self, room_id: &str) -> Result<RoomModel, AppError> {
        let outcome = self.rooms.close_room(room_id).await?;
        self.broker.broadcast_closure(room_id)?;
        Ok(outcome.room().clone())
    }

    /// Administrative purge: closes the room if needed, then drops its history
    #[instrument(skip(self))]
    pub async fn purge_room(&self, room_id: &str) -> Result<u64, AppError> {
        let _lane = self.lanes.acquire(room_id).await?;

        let room = self.rooms.get_room(room_id).await?;
        if !room.is_closed() {
            self.close_under_lane(room_id).await?;
        }
        let deleted = self.messages.delete_room_history(room_id).await?;
        info!(room_id = %room_id, deleted, "Room purged");
        Ok(deleted)
    }

    /// Backfill read with the same access rules as join
    #[instrument(skip(self))]
    pub async fn history(
        &self,
        room_id: &str,
        user_id: &str,
        since_id: Option<i64>,
    ) -> Result<Vec<MessageModel>, AppError> {
        self.rooms.get_readable_room(room_id, user_id).await?;
        self.messages.list_messages(room_id, since_id).await
    }
}
