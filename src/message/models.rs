use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One stored chat message; immutable once appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageModel {
    /// Totally ordered within a room, unique across rooms
    pub id: i64,
    pub room_id: String,
    pub sender_id: String,
    pub content: String,
    /// Server-assigned, never decreasing within a room
    pub created_at: DateTime<Utc>,
}

impl MessageModel {
    /// Sort key for a room's log
    pub fn order_key(&self) -> (DateTime<Utc>, i64) {
        (self.created_at, self.id)
    }
}
