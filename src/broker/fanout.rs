use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::connection::{ConnectionHandle, ConnectionId};
use crate::message::models::MessageModel;
use crate::shared::{poisoned, AppError};
use crate::websockets::ServerMessage;

/// Proof of one connection's subscription to one room
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub room_id: String,
    pub connection_id: ConnectionId,
}

#[derive(Default)]
struct RoomSubscribers {
    subscribers: HashMap<ConnectionId, ConnectionHandle>,
    /// Set once the closure notice went out; the room takes no new listeners
    closed: bool,
    /// Removed from the table; holders of a stale handle must look it up again
    evicted: bool,
}

impl RoomSubscribers {
    fn is_idle(&self) -> bool {
        self.subscribers.is_empty() && !self.closed
    }
}

/// Maps rooms to their live connections and delivers room events.
///
/// Each room's subscriber set has its own lock, so publishing to one room
/// never waits on another. Callers publish a room's messages from a single
/// send lane, which keeps per-subscriber delivery in log order.
///
/// Open rooms are dropped from the table once their last subscriber goes;
/// closed rooms keep an empty entry so they refuse later subscriptions.
#[derive(Default)]
pub struct FanoutBroker {
    rooms: RwLock<HashMap<String, Arc<Mutex<RoomSubscribers>>>>,
}

impl FanoutBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn room(&self, room_id: &str) -> Result<Option<Arc<Mutex<RoomSubscribers>>>, AppError> {
        Ok(self.rooms.read().map_err(poisoned)?.get(room_id).cloned())
    }

    fn room_or_create(&self, room_id: &str) -> Result<Arc<Mutex<RoomSubscribers>>, AppError> {
        if let Some(room) = self.room(room_id)? {
            return Ok(room);
        }
        let mut rooms = self.rooms.write().map_err(poisoned)?;
        Ok(Arc::clone(rooms.entry(room_id.to_string()).or_default()))
    }

    /// Removes an open room with no subscribers left. Takes the table lock
    /// before the room lock, so callers must not hold the room lock.
    fn evict_if_idle(&self, room_id: &str) -> Result<(), AppError> {
        let mut rooms = self.rooms.write().map_err(poisoned)?;
        let idle = match rooms.get(room_id) {
            Some(room) => {
                let mut room = room.lock().map_err(poisoned)?;
                if room.is_idle() {
                    room.evicted = true;
                }
                room.evicted
            }
            None => false,
        };
        if idle {
            rooms.remove(room_id);
            debug!(room_id = %room_id, "Evicted room without subscribers");
        }
        Ok(())
    }

    /// Registers `connection` as a listener of `room_id`. Subscribing twice
    /// from the same connection keeps a single subscription.
    pub fn subscribe(
        &self,
        room_id: &str,
        connection: ConnectionHandle,
    ) -> Result<SubscriptionHandle, AppError> {
        loop {
            let entry = self.room_or_create(room_id)?;
            let mut room = entry.lock().map_err(poisoned)?;
            // Evicted entries are no longer in the table; look the room up again
            if room.evicted {
                continue;
            }

            if room.closed {
                debug!(room_id = %room_id, "Refusing subscription to closed room");
                return Err(AppError::RoomClosed(room_id.to_string()));
            }

            let handle = SubscriptionHandle {
                room_id: room_id.to_string(),
                connection_id: connection.id(),
            };
            debug!(
                room_id = %room_id,
                connection_id = %connection.id(),
                user_id = %connection.user_id(),
                "Connection subscribed"
            );
            room.subscribers.insert(connection.id(), connection);
            return Ok(handle);
        }
    }

    /// Delivers `message` to every subscriber of its room and returns how many
    /// received it. Dead connections are dropped from the set.
    pub fn publish(&self, room_id: &str, message: &MessageModel) -> Result<usize, AppError> {
        let Some(entry) = self.room(room_id)? else {
            return Ok(0);
        };
        let mut room = entry.lock().map_err(poisoned)?;

        let event = ServerMessage::NewMessage(message.clone());
        let mut delivered = 0;
        let before = room.subscribers.len();
        room.subscribers.retain(|connection_id, connection| {
            match connection.deliver(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(e) => {
                    warn!(
                        room_id = %room_id,
                        connection_id = %connection_id,
                        error = %e,
                        "Dropping subscriber after failed delivery"
                    );
                    false
                }
            }
        });
        let emptied = before > 0 && room.is_idle();
        drop(room);

        debug!(room_id = %room_id, message_id = message.id, delivered, "Message published");
        if emptied {
            self.evict_if_idle(room_id)?;
        }
        Ok(delivered)
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<bool, AppError> {
        let Some(room) = self.room(&handle.room_id)? else {
            return Ok(false);
        };
        let (removed, idle) = {
            let mut room = room.lock().map_err(poisoned)?;
            let removed = room.subscribers.remove(&handle.connection_id).is_some();
            (removed, room.is_idle())
        };

        if removed {
            debug!(
                room_id = %handle.room_id,
                connection_id = %handle.connection_id,
                "Connection unsubscribed"
            );
            if idle {
                self.evict_if_idle(&handle.room_id)?;
            }
        }
        Ok(removed)
    }

    /// Tells every subscriber the room is read-only, then drops them all.
    /// Later calls find no subscribers and notify nobody.
    pub fn broadcast_closure(&self, room_id: &str) -> Result<usize, AppError> {
        loop {
            let entry = self.room_or_create(room_id)?;
            let mut room = entry.lock().map_err(poisoned)?;
            if room.evicted {
                continue;
            }
            // Closed entries are never evicted
            room.closed = true;

            let event = ServerMessage::RoomClosed {
                room_id: room_id.to_string(),
            };
            let mut notified = 0;
            for (connection_id, connection) in room.subscribers.drain() {
                match connection.deliver(event.clone()) {
                    Ok(()) => notified += 1,
                    Err(e) => warn!(
                        room_id = %room_id,
                        connection_id = %connection_id,
                        error = %e,
                        "Closure notice not delivered"
                    ),
                }
            }

            info!(room_id = %room_id, notified, "Room closure broadcast");
            return Ok(notified);
        }
    }

    pub fn subscriber_count(&self, room_id: &str) -> Result<usize, AppError> {
        match self.room(room_id)? {
            Some(room) => Ok(room.lock().map_err(poisoned)?.subscribers.len()),
            None => Ok(0),
        }
    }

    /// Rooms currently held in the subscriber table
    pub fn tracked_rooms(&self) -> Result<usize, AppError> {
        Ok(self.rooms.read().map_err(poisoned)?.len())
    }

    pub fn is_subscribed(&self, handle: &SubscriptionHandle) -> Result<bool, AppError> {
        match self.room(&handle.room_id)? {
            Some(room) => Ok(room
                .lock()
                .map_err(poisoned)?
                .subscribers
                .contains_key(&handle.connection_id)),
            None => Ok(false),
        }
    }
}
