use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::models::{RoomKind, RoomModel, RoomStatus};

/// Request payload for opening a direct chat from an approved chat request
#[derive(Debug, Deserialize)]
pub struct DirectChatRequest {
    pub participants: Vec<String>,
}

/// Room summary returned by the HTTP endpoints
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct RoomResponse {
    pub id: String,
    pub kind: RoomKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub status: RoomStatus,
    pub participants: Vec<String>,
    /// Per-sender counts, direct chats only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_counts: Option<HashMap<String, u32>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl From<RoomModel> for RoomResponse {
    fn from(room: RoomModel) -> Self {
        let message_counts = match room.kind {
            RoomKind::DirectChat => Some(room.message_counts),
            RoomKind::Discussion => None,
        };

        Self {
            id: room.id,
            kind: room.kind,
            topic: room.topic,
            status: room.status,
            participants: room.participants,
            message_counts,
            created_at: room.created_at,
            closed_at: room.closed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discussion_summary_omits_counts() {
        let mut room = RoomModel::new_discussion("sports".into());
        room.add_participant("alice");

        let json = serde_json::to_value(RoomResponse::from(room)).unwrap();
        assert_eq!(json["kind"], "discussion");
        assert_eq!(json["topic"], "sports");
        assert_eq!(json["status"], "open");
        assert!(json.get("message_counts").is_none());
    }

    #[test]
    fn test_direct_chat_summary_reports_counts() {
        let mut room = RoomModel::new_direct_chat("alice".into(), "bob".into());
        room.message_counts.insert("alice".into(), 3);
        room.status = RoomStatus::Closing;

        let json = serde_json::to_value(RoomResponse::from(room)).unwrap();
        assert_eq!(json["kind"], "direct_chat");
        assert_eq!(json["status"], "closing");
        assert_eq!(json["message_counts"]["alice"], 3);
        assert!(json.get("topic").is_none());
    }
}
