use std::collections::HashMap;

use super::models::{RoomKind, RoomModel};

/// Decides when a direct chat has run its course.
///
/// A direct chat closes as soon as any single participant's accepted
/// message count reaches the threshold. Discussions never close here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosurePolicy {
    threshold: u32,
}

impl Default for ClosurePolicy {
    fn default() -> Self {
        Self::new(5)
    }
}

impl ClosurePolicy {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// `updated_counts` must be the post-increment counts from the same
    /// critical section that accepted the message.
    pub fn should_close(&self, room: &RoomModel, updated_counts: &HashMap<String, u32>) -> bool {
        match room.kind {
            RoomKind::DirectChat => updated_counts
                .iter()
                .any(|(sender, count)| room.has_participant(sender) && *count >= self.threshold),
            RoomKind::Discussion => false,
        }
    }
}
