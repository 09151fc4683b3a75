use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

use super::messages::{ClientMessage, ServerMessage};
use super::socket::{DisconnectReason, MessageHandler};
use crate::broker::{ConnectionHandle, SubscriptionHandle};
use crate::chat::{ChatService, JoinOutcome};
use crate::identity::Identity;
use crate::shared::AppError;

/// Protocol state of one client connection.
///
/// Owns the connection's outbound handle and its live subscriptions, one per
/// room; errors go back to this client only.
pub struct SessionGateway {
    identity: Identity,
    connection: ConnectionHandle,
    chat: ChatService,
    subscriptions: HashMap<String, SubscriptionHandle>,
}

impl SessionGateway {
    pub fn new(identity: Identity, connection: ConnectionHandle, chat: ChatService) -> Self {
        Self {
            identity,
            connection,
            chat,
            subscriptions: HashMap::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.identity.user_id
    }

    /// Rooms this connection currently receives live events for. Rooms the
    /// broker dropped us from (closure, failed delivery) are forgotten here.
    pub fn joined_rooms(&mut self) -> Vec<String> {
        let chat = &self.chat;
        self.subscriptions
            .retain(|_, handle| chat.is_subscribed(handle));

        let mut rooms: Vec<_> = self.subscriptions.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    #[instrument(skip(self), fields(user_id = %self.identity.user_id))]
    pub async fn join(&mut self, room_id: &str, since_id: Option<i64>) -> Result<(), AppError> {
        let outcome = self
            .chat
            .join(room_id, &self.identity.user_id, &self.connection, since_id)
            .await?;

        match outcome {
            JoinOutcome::Subscribed(handle) => {
                self.subscriptions.insert(room_id.to_string(), handle);
            }
            JoinOutcome::ReadOnly => {
                self.subscriptions.remove(room_id);
            }
        }
        Ok(())
    }

    #[instrument(skip(self, content), fields(user_id = %self.identity.user_id))]
    pub async fn send(&mut self, room_id: &str, content: String) -> Result<(), AppError> {
        self.chat
            .send(room_id, &self.identity.user_id, content)
            .await
            .map(|_| ())
    }

    #[instrument(skip(self), fields(user_id = %self.identity.user_id))]
    pub fn leave(&mut self, room_id: &str) -> Result<(), AppError> {
        match self.subscriptions.remove(room_id) {
            Some(handle) => {
                self.chat.leave(&handle)?;
                debug!(room_id = %room_id, "Left room");
            }
            None => debug!(room_id = %room_id, "Leave for a room that was not joined"),
        }
        Ok(())
    }

    fn report(&self, room_id: Option<&str>, error: &AppError) {
        let frame = match room_id {
            Some(room_id) => ServerMessage::room_error(room_id, error),
            None => ServerMessage::error(error),
        };
        if let Err(e) = self.connection.deliver(frame) {
            debug!(error = %e, "Could not report error to departed client");
        }
    }
}

#[async_trait]
impl MessageHandler for SessionGateway {
    async fn handle_message(&mut self, message: String) {
        let request = match serde_json::from_str::<ClientMessage>(&message) {
            Ok(request) => request,
            Err(e) => {
                warn!(user_id = %self.identity.user_id, error = %e, "Failed to parse client frame");
                self.report(None, &AppError::BadRequest(format!("Unreadable frame: {e}")));
                return;
            }
        };

        let (room_id, result) = match request {
            ClientMessage::JoinRoom { room_id, since_id } => {
                let result = self.join(&room_id, since_id).await;
                (room_id, result)
            }
            ClientMessage::SendMessage { room_id, content } => {
                let result = self.send(&room_id, content).await;
                (room_id, result)
            }
            ClientMessage::LeaveRoom { room_id } => {
                let result = self.leave(&room_id);
                (room_id, result)
            }
        };

        if let Err(e) = result {
            debug!(room_id = %room_id, code = e.code(), "Request failed");
            self.report(Some(&room_id), &e);
        }
    }

    async fn on_disconnect(&mut self, reason: DisconnectReason) {
        for (room_id, handle) in self.subscriptions.drain() {
            if let Err(e) = self.chat.leave(&handle) {
                warn!(room_id = %room_id, error = %e, "Failed to unsubscribe on disconnect");
            }
        }
        info!(user_id = %self.identity.user_id, reason = ?reason, "Session ended");
    }
}
