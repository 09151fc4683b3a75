use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum_macros::{Display, EnumIter, EnumString};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RoomKind {
    /// Two fixed participants, capped by the closure policy
    DirectChat,
    /// Open membership keyed by topic, never auto-closed
    Discussion,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RoomStatus {
    Open,
    /// The closure policy fired; the triggering message is still in flight
    Closing,
    Closed,
}

/// Stable identity a room is created from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomIdentity {
    DirectChat { participants: [String; 2] },
    Discussion { topic: String },
}

impl RoomIdentity {
    pub fn direct_chat(first: impl Into<String>, second: impl Into<String>) -> Self {
        RoomIdentity::DirectChat {
            participants: [first.into(), second.into()],
        }
    }

    pub fn discussion(topic: impl Into<String>) -> Self {
        RoomIdentity::Discussion {
            topic: topic.into(),
        }
    }

    pub fn kind(&self) -> RoomKind {
        match self {
            RoomIdentity::DirectChat { .. } => RoomKind::DirectChat,
            RoomIdentity::Discussion { .. } => RoomKind::Discussion,
        }
    }
}

/// Authoritative state of one room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomModel {
    pub id: String,
    pub kind: RoomKind,
    pub topic: Option<String>,
    /// Ordered pair for direct chats, join order for discussions
    pub participants: Vec<String>,
    pub status: RoomStatus,
    /// Accepted messages per sender; only ever holds participants
    pub message_counts: HashMap<String, u32>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl RoomModel {
    pub fn new_direct_chat(first: String, second: String) -> Self {
        let mut message_counts = HashMap::new();
        message_counts.insert(first.clone(), 0);
        message_counts.insert(second.clone(), 0);

        Self {
            id: Uuid::new_v4().to_string(),
            kind: RoomKind::DirectChat,
            topic: None,
            participants: vec![first, second],
            status: RoomStatus::Open,
            message_counts,
            created_at: Utc::now(),
            closed_at: None,
        }
    }

    pub fn new_discussion(topic: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: RoomKind::Discussion,
            topic: Some(topic),
            participants: vec![],
            status: RoomStatus::Open,
            message_counts: HashMap::new(),
            created_at: Utc::now(),
            closed_at: None,
        }
    }

    pub fn from_identity(identity: &RoomIdentity) -> Self {
        match identity {
            RoomIdentity::DirectChat {
                participants: [first, second],
            } => Self::new_direct_chat(first.clone(), second.clone()),
            RoomIdentity::Discussion { topic } => Self::new_discussion(topic.clone()),
        }
    }

    /// Only an open room takes new messages or members
    pub fn accepts_messages(&self) -> bool {
        self.status == RoomStatus::Open
    }

    pub fn is_closed(&self) -> bool {
        self.status == RoomStatus::Closed
    }

    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    /// Adds a discussion member; direct chat membership is fixed at creation
    pub fn add_participant(&mut self, user_id: &str) -> bool {
        if self.kind != RoomKind::Discussion || self.has_participant(user_id) {
            return false;
        }
        self.participants.push(user_id.to_string());
        self.message_counts.insert(user_id.to_string(), 0);
        true
    }

    pub fn message_count(&self, user_id: &str) -> u32 {
        self.message_counts.get(user_id).copied().unwrap_or(0)
    }

    /// Whether `user_id` may read this room's history
    pub fn can_read(&self, user_id: &str) -> bool {
        match self.kind {
            RoomKind::DirectChat => self.has_participant(user_id),
            RoomKind::Discussion => true,
        }
    }
}

/// Order-independent key for a direct chat pair
pub fn pair_key(first: &str, second: &str) -> String {
    if first <= second {
        format!("{first}\u{1f}{second}")
    } else {
        format!("{second}\u{1f}{first}")
    }
}
