use serde::{Deserialize, Serialize};

use crate::message::models::MessageModel;
use crate::shared::AppError;

/// Client -> Server frames, `{"type": ..., "payload": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: String,
        /// Replay only messages after this id
        #[serde(default)]
        since_id: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    SendMessage { room_id: String, content: String },
    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: String },
}

/// Server -> Client frames, same envelope as `ClientMessage`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerMessage {
    NewMessage(MessageModel),
    /// History replayed on join, ahead of any live message
    #[serde(rename_all = "camelCase")]
    RoomHistory {
        room_id: String,
        messages: Vec<MessageModel>,
    },
    #[serde(rename_all = "camelCase")]
    RoomClosed { room_id: String },
    #[serde(rename_all = "camelCase")]
    Error {
        code: String,
        message: String,
        retryable: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
    },
}

impl ServerMessage {
    pub fn error(error: &AppError) -> Self {
        ServerMessage::Error {
            code: error.code().to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
            room_id: None,
        }
    }

    /// Error event tied to the room the failed request named
    pub fn room_error(room_id: &str, error: &AppError) -> Self {
        ServerMessage::Error {
            code: error.code().to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
            room_id: Some(room_id.to_string()),
        }
    }

    pub fn to_json(&self) -> Result<String, AppError> {
        serde_json::to_string(self).map_err(|_| AppError::Internal)
    }
}
