use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::shared::{poisoned, AppError};

pub type Lane = Arc<AsyncMutex<()>>;

/// One async lock per room. Holding a room's lane makes the holder the only
/// writer of that room's log and subscriber events.
///
/// A lane lives only while someone holds or waits on it, so the table stays
/// the size of the rooms currently in use.
#[derive(Default)]
pub struct RoomLanes {
    lanes: Mutex<HashMap<String, Lane>>,
}

/// Exclusive hold on one room's lane; releases it on drop
pub struct LaneGuard {
    lanes: Arc<RoomLanes>,
    room_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl RoomLanes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lane(&self, room_id: &str) -> Result<Lane, AppError> {
        let mut lanes = self.lanes.lock().map_err(poisoned)?;
        Ok(Arc::clone(lanes.entry(room_id.to_string()).or_default()))
    }

    pub async fn acquire(self: &Arc<Self>, room_id: &str) -> Result<LaneGuard, AppError> {
        let guard = self.lane(room_id)?.lock_owned().await;
        Ok(LaneGuard {
            lanes: Arc::clone(self),
            room_id: room_id.to_string(),
            guard: Some(guard),
        })
    }

    /// Drops the room's lane unless another task still holds a handle to it.
    /// Handles are only cloned under the table lock, so the count is exact.
    fn release(&self, room_id: &str) {
        let Ok(mut lanes) = self.lanes.lock() else {
            return;
        };
        if lanes
            .get(room_id)
            .is_some_and(|lane| Arc::strong_count(lane) == 1)
        {
            lanes.remove(room_id);
        }
    }

    pub fn active_lanes(&self) -> Result<usize, AppError> {
        Ok(self.lanes.lock().map_err(poisoned)?.len())
    }
}

impl Drop for LaneGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.lanes.release(&self.room_id);
    }
}
