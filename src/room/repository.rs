use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use super::models::{pair_key, RoomIdentity, RoomKind, RoomModel, RoomStatus};
use super::policy::ClosurePolicy;
use crate::shared::{poisoned, AppError};

/// Result of accepting one message into a room's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOutcome {
    /// Sender's count including the message just accepted
    pub new_count: u32,
    /// The closure policy fired on this message
    pub should_close: bool,
}

/// Result of a close request
#[derive(Debug, Clone)]
pub enum CloseOutcome {
    /// This call moved the room to Closed
    Closed(RoomModel),
    /// Someone else already closed it
    AlreadyClosed(RoomModel),
}

impl CloseOutcome {
    pub fn room(&self) -> &RoomModel {
        match self {
            CloseOutcome::Closed(room) | CloseOutcome::AlreadyClosed(room) => room,
        }
    }

    pub fn transitioned(&self) -> bool {
        matches!(self, CloseOutcome::Closed(_))
    }
}

/// Trait for room registry operations
#[async_trait]
pub trait RoomRepository: Send + Sync {
    /// Direct chats fail with `DuplicateRoom` while an unclosed room exists for
    /// the pair; discussions return the existing room for the topic.
    async fn create_or_get_room(&self, identity: &RoomIdentity) -> Result<RoomModel, AppError>;

    async fn get_room(&self, room_id: &str) -> Result<Option<RoomModel>, AppError>;

    async fn list_rooms(&self) -> Result<Vec<RoomModel>, AppError>;

    /// Discussion membership; a no-op for existing members
    async fn add_participant(&self, room_id: &str, user_id: &str) -> Result<RoomModel, AppError>;

    /// Atomically counts one accepted message and evaluates the closure
    /// policy on the updated counts. A room whose policy fires moves to
    /// Closing, so no further message is accepted.
    async fn record_message(
        &self,
        room_id: &str,
        sender_id: &str,
        policy: &ClosurePolicy,
    ) -> Result<RecordOutcome, AppError>;

    /// Undoes a `record_message` whose message was never persisted
    async fn rollback_message(&self, room_id: &str, sender_id: &str) -> Result<(), AppError>;

    async fn close_room(&self, room_id: &str) -> Result<CloseOutcome, AppError>;
}

/// Lookup tables used only while creating rooms
#[derive(Default)]
struct RoomIndex {
    /// topic -> room id
    topics: HashMap<String, String>,
    /// unordered participant pair -> latest room id
    pairs: HashMap<String, String>,
}

/// In-memory implementation of RoomRepository.
///
/// The room table is only locked long enough to fetch a room's handle;
/// every mutation happens under that room's own mutex, so rooms never
/// contend with each other.
pub struct InMemoryRoomRepository {
    rooms: RwLock<HashMap<String, Arc<Mutex<RoomModel>>>>,
    index: Mutex<RoomIndex>,
}

impl Default for InMemoryRoomRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRoomRepository {
    /// Creates a new empty in-memory repository
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            index: Mutex::new(RoomIndex::default()),
        }
    }

    /// Creates a repository pre-populated with rooms (useful for tests)
    pub fn with_rooms(rooms: Vec<RoomModel>) -> Self {
        let repo = Self::new();
        {
            let mut index = repo.index.lock().unwrap_or_else(|e| e.into_inner());
            let mut table = repo.rooms.write().unwrap_or_else(|e| e.into_inner());
            for room in rooms {
                match room.kind {
                    RoomKind::Discussion => {
                        if let Some(topic) = &room.topic {
                            index.topics.insert(topic.clone(), room.id.clone());
                        }
                    }
                    RoomKind::DirectChat => {
                        if let [first, second] = room.participants.as_slice() {
                            index.pairs.insert(pair_key(first, second), room.id.clone());
                        }
                    }
                }
                table.insert(room.id.clone(), Arc::new(Mutex::new(room)));
            }
        }
        repo
    }

    fn room_handle(&self, room_id: &str) -> Result<Arc<Mutex<RoomModel>>, AppError> {
        let rooms = self.rooms.read().map_err(poisoned)?;
        rooms
            .get(room_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Room {room_id} not found")))
    }

    fn insert_room(&self, room: &RoomModel) -> Result<(), AppError> {
        let mut rooms = self.rooms.write().map_err(poisoned)?;
        rooms.insert(room.id.clone(), Arc::new(Mutex::new(room.clone())));
        Ok(())
    }
}

#[async_trait]
impl RoomRepository for InMemoryRoomRepository {
    #[instrument(skip(self))]
    async fn create_or_get_room(&self, identity: &RoomIdentity) -> Result<RoomModel, AppError> {
        // Holding the index lock makes create-or-get atomic per identity
        let mut index = self.index.lock().map_err(poisoned)?;

        match identity {
            RoomIdentity::Discussion { topic } => {
                if let Some(room_id) = index.topics.get(topic) {
                    let room = self.room_handle(room_id)?.lock().map_err(poisoned)?.clone();
                    debug!(room_id = %room.id, topic = %topic, "Discussion already exists");
                    return Ok(room);
                }

                let room = RoomModel::from_identity(identity);
                self.insert_room(&room)?;
                index.topics.insert(topic.clone(), room.id.clone());
                info!(room_id = %room.id, topic = %topic, "Discussion room created");
                Ok(room)
            }
            RoomIdentity::DirectChat {
                participants: [first, second],
            } => {
                let key = pair_key(first, second);
                if let Some(existing_id) = index.pairs.get(&key) {
                    let existing = self.room_handle(existing_id)?;
                    let existing = existing.lock().map_err(poisoned)?;
                    if !existing.is_closed() {
                        warn!(room_id = %existing.id, "Open direct chat already exists for pair");
                        return Err(AppError::DuplicateRoom(existing.id.clone()));
                    }
                }

                let room = RoomModel::from_identity(identity);
                self.insert_room(&room)?;
                index.pairs.insert(key, room.id.clone());
                info!(room_id = %room.id, "Direct chat room created");
                Ok(room)
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_room(&self, room_id: &str) -> Result<Option<RoomModel>, AppError> {
        match self.room_handle(room_id) {
            Ok(handle) => Ok(Some(handle.lock().map_err(poisoned)?.clone())),
            Err(AppError::NotFound(_)) => {
                debug!(room_id = %room_id, "Room not found in memory");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn list_rooms(&self) -> Result<Vec<RoomModel>, AppError> {
        let handles: Vec<_> = self
            .rooms
            .read()
            .map_err(poisoned)?
            .values()
            .cloned()
            .collect();

        handles
            .iter()
            .map(|handle| handle.lock().map(|room| room.clone()).map_err(poisoned))
            .collect()
    }

    #[instrument(skip(self))]
    async fn add_participant(&self, room_id: &str, user_id: &str) -> Result<RoomModel, AppError> {
        let handle = self.room_handle(room_id)?;
        let mut room = handle.lock().map_err(poisoned)?;

        if room.kind == RoomKind::DirectChat {
            return if room.has_participant(user_id) {
                Ok(room.clone())
            } else {
                Err(AppError::NotAParticipant(room_id.to_string()))
            };
        }
        if !room.accepts_messages() {
            return Err(AppError::RoomClosed(room_id.to_string()));
        }

        if room.add_participant(user_id) {
            debug!(room_id = %room_id, user_id = %user_id, "Participant added to discussion");
        }
        Ok(room.clone())
    }

    #[instrument(skip(self, policy))]
    async fn record_message(
        &self,
        room_id: &str,
        sender_id: &str,
        policy: &ClosurePolicy,
    ) -> Result<RecordOutcome, AppError> {
        let handle = self.room_handle(room_id)?;
        let mut room = handle.lock().map_err(poisoned)?;

        if !room.accepts_messages() {
            return Err(AppError::RoomClosed(room_id.to_string()));
        }
        match room.kind {
            RoomKind::DirectChat if !room.has_participant(sender_id) => {
                return Err(AppError::NotAParticipant(room_id.to_string()));
            }
            RoomKind::Discussion => {
                room.add_participant(sender_id);
            }
            RoomKind::DirectChat => {}
        }

        let new_count = {
            let count = room.message_counts.entry(sender_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let should_close = policy.should_close(&room, &room.message_counts);
        if should_close {
            room.status = RoomStatus::Closing;
            info!(
                room_id = %room_id,
                sender_id = %sender_id,
                count = new_count,
                "Closure threshold reached"
            );
        }

        Ok(RecordOutcome {
            new_count,
            should_close,
        })
    }

    #[instrument(skip(self))]
    async fn rollback_message(&self, room_id: &str, sender_id: &str) -> Result<(), AppError> {
        let handle = self.room_handle(room_id)?;
        let mut room = handle.lock().map_err(poisoned)?;

        if let Some(count) = room.message_counts.get_mut(sender_id) {
            *count = count.saturating_sub(1);
        }
        if room.status == RoomStatus::Closing {
            room.status = RoomStatus::Open;
        }
        warn!(room_id = %room_id, sender_id = %sender_id, "Rolled back unpersisted message");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn close_room(&self, room_id: &str) -> Result<CloseOutcome, AppError> {
        let handle = self.room_handle(room_id)?;
        let mut room = handle.lock().map_err(poisoned)?;

        if room.is_closed() {
            debug!(room_id = %room_id, "Room already closed");
            return Ok(CloseOutcome::AlreadyClosed(room.clone()));
        }
        room.status = RoomStatus::Closed;
        room.closed_at = Some(Utc::now());
        info!(room_id = %room_id, "Room closed");
        Ok(CloseOutcome::Closed(room.clone()))
    }
}

/// PostgreSQL implementation of the room registry.
///
/// Per-room serialization comes from `SELECT ... FOR UPDATE` on the room row;
/// uniqueness of topics and open pairs is enforced by partial unique indexes.
pub struct PostgresRoomRepository {
    pool: PgPool,
}

impl PostgresRoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const UNIQUE_VIOLATION: &str = "23505";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}

fn parse_enum<T: FromStr>(raw: &str) -> Result<T, AppError> {
    T::from_str(raw).map_err(|_| {
        warn!(value = %raw, "Unexpected enum value in rooms table");
        AppError::PersistenceFailure(format!("unexpected value {raw}"))
    })
}

async fn load_room(conn: &mut PgConnection, room_id: &str) -> Result<Option<RoomModel>, AppError> {
    let row = sqlx::query(
        "SELECT id, kind, topic, status, created_at, closed_at FROM rooms WHERE id = $1",
    )
    .bind(room_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let members = sqlx::query(
        "SELECT user_id, message_count FROM room_participants WHERE room_id = $1 ORDER BY position",
    )
    .bind(room_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut participants = Vec::with_capacity(members.len());
    let mut message_counts = HashMap::with_capacity(members.len());
    for member in members {
        let user_id: String = member.get("user_id");
        let count: i32 = member.get("message_count");
        message_counts.insert(user_id.clone(), count.max(0) as u32);
        participants.push(user_id);
    }

    let kind: String = row.get("kind");
    let status: String = row.get("status");
    let created_at: DateTime<Utc> = row.get("created_at");
    let closed_at: Option<DateTime<Utc>> = row.get("closed_at");

    Ok(Some(RoomModel {
        id: row.get("id"),
        kind: parse_enum(&kind)?,
        topic: row.get("topic"),
        participants,
        status: parse_enum(&status)?,
        message_counts,
        created_at,
        closed_at,
    }))
}

#[async_trait]
impl RoomRepository for PostgresRoomRepository {
    #[instrument(skip(self))]
    async fn create_or_get_room(&self, identity: &RoomIdentity) -> Result<RoomModel, AppError> {
        let room = RoomModel::from_identity(identity);
        let mut tx = self.pool.begin().await?;

        match identity {
            RoomIdentity::Discussion { topic } => {
                sqlx::query(
                    "INSERT INTO rooms (id, kind, topic, status, created_at) VALUES ($1, $2, $3, $4, $5) \
                     ON CONFLICT (topic) WHERE kind = 'discussion' DO NOTHING",
                )
                .bind(&room.id)
                .bind(room.kind.to_string())
                .bind(topic)
                .bind(room.status.to_string())
                .bind(room.created_at)
                .execute(&mut *tx)
                .await?;

                let room_id: String =
                    sqlx::query("SELECT id FROM rooms WHERE kind = 'discussion' AND topic = $1")
                        .bind(topic)
                        .fetch_one(&mut *tx)
                        .await?
                        .get("id");

                let stored = load_room(&mut tx, &room_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Room {room_id} not found")))?;
                tx.commit().await?;
                debug!(room_id = %stored.id, topic = %topic, "Discussion resolved in database");
                Ok(stored)
            }
            RoomIdentity::DirectChat {
                participants: [first, second],
            } => {
                let inserted = sqlx::query(
                    "INSERT INTO rooms (id, kind, pair_key, status, created_at) VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(&room.id)
                .bind(room.kind.to_string())
                .bind(pair_key(first, second))
                .bind(room.status.to_string())
                .bind(room.created_at)
                .execute(&mut *tx)
                .await;

                if let Err(e) = inserted {
                    if is_unique_violation(&e) {
                        warn!("Open direct chat already exists for pair");
                        return Err(AppError::DuplicateRoom(pair_key(first, second)));
                    }
                    return Err(e.into());
                }

                for (position, user_id) in room.participants.iter().enumerate() {
                    sqlx::query(
                        "INSERT INTO room_participants (room_id, user_id, position, message_count) VALUES ($1, $2, $3, 0)",
                    )
                    .bind(&room.id)
                    .bind(user_id)
                    .bind(position as i32)
                    .execute(&mut *tx)
                    .await?;
                }

                tx.commit().await?;
                info!(room_id = %room.id, "Direct chat room created in database");
                Ok(room)
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_room(&self, room_id: &str) -> Result<Option<RoomModel>, AppError> {
        let mut conn = self.pool.acquire().await?;
        load_room(&mut conn, room_id).await
    }

    #[instrument(skip(self))]
    async fn list_rooms(&self) -> Result<Vec<RoomModel>, AppError> {
        let mut conn = self.pool.acquire().await?;
        let ids: Vec<String> = sqlx::query("SELECT id FROM rooms ORDER BY created_at")
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .map(|row| row.get("id"))
            .collect();

        let mut rooms = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(room) = load_room(&mut conn, &id).await? {
                rooms.push(room);
            }
        }
        Ok(rooms)
    }

    #[instrument(skip(self))]
    async fn add_participant(&self, room_id: &str, user_id: &str) -> Result<RoomModel, AppError> {
        let mut tx = self.pool.begin().await?;
        let room = lock_room(&mut tx, room_id).await?;

        if room.kind == RoomKind::DirectChat {
            return if room.has_participant(user_id) {
                Ok(room)
            } else {
                Err(AppError::NotAParticipant(room_id.to_string()))
            };
        }
        if !room.accepts_messages() {
            return Err(AppError::RoomClosed(room_id.to_string()));
        }

        insert_discussion_member(&mut tx, room_id, user_id, 0).await?;
        let updated = load_room(&mut tx, room_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Room {room_id} not found")))?;
        tx.commit().await?;
        Ok(updated)
    }

    #[instrument(skip(self, policy))]
    async fn record_message(
        &self,
        room_id: &str,
        sender_id: &str,
        policy: &ClosurePolicy,
    ) -> Result<RecordOutcome, AppError> {
        let mut tx = self.pool.begin().await?;
        let room = lock_room(&mut tx, room_id).await?;

        if !room.accepts_messages() {
            return Err(AppError::RoomClosed(room_id.to_string()));
        }

        let new_count: i32 = match room.kind {
            RoomKind::DirectChat => sqlx::query(
                "UPDATE room_participants SET message_count = message_count + 1 \
                 WHERE room_id = $1 AND user_id = $2 RETURNING message_count",
            )
            .bind(room_id)
            .bind(sender_id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| row.get::<i32, _>("message_count"))
            .ok_or_else(|| AppError::NotAParticipant(room_id.to_string()))?,
            RoomKind::Discussion => insert_discussion_member(&mut tx, room_id, sender_id, 1).await?,
        };

        let updated = load_room(&mut tx, room_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Room {room_id} not found")))?;
        let should_close = policy.should_close(&updated, &updated.message_counts);
        if should_close {
            sqlx::query("UPDATE rooms SET status = $2 WHERE id = $1")
                .bind(room_id)
                .bind(RoomStatus::Closing.to_string())
                .execute(&mut *tx)
                .await?;
            info!(room_id = %room_id, sender_id = %sender_id, count = new_count, "Closure threshold reached");
        }
        tx.commit().await?;

        Ok(RecordOutcome {
            new_count: new_count.max(0) as u32,
            should_close,
        })
    }

    #[instrument(skip(self))]
    async fn rollback_message(&self, room_id: &str, sender_id: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        lock_room(&mut tx, room_id).await?;

        sqlx::query(
            "UPDATE room_participants SET message_count = GREATEST(message_count - 1, 0) \
             WHERE room_id = $1 AND user_id = $2",
        )
        .bind(room_id)
        .bind(sender_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE rooms SET status = 'open' WHERE id = $1 AND status = 'closing'")
            .bind(room_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        warn!(room_id = %room_id, sender_id = %sender_id, "Rolled back unpersisted message");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn close_room(&self, room_id: &str) -> Result<CloseOutcome, AppError> {
        let mut tx = self.pool.begin().await?;
        let room = lock_room(&mut tx, room_id).await?;

        if room.is_closed() {
            return Ok(CloseOutcome::AlreadyClosed(room));
        }

        let closed_at = Utc::now();
        sqlx::query("UPDATE rooms SET status = 'closed', closed_at = $2, pair_key = NULL WHERE id = $1")
            .bind(room_id)
            .bind(closed_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(room_id = %room_id, "Room closed in database");
        Ok(CloseOutcome::Closed(RoomModel {
            status: RoomStatus::Closed,
            closed_at: Some(closed_at),
            ..room
        }))
    }
}

/// Takes the row lock that serializes all writes to one room
async fn lock_room(conn: &mut PgConnection, room_id: &str) -> Result<RoomModel, AppError> {
    sqlx::query("SELECT id FROM rooms WHERE id = $1 FOR UPDATE")
        .bind(room_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Room {room_id} not found")))?;

    load_room(conn, room_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Room {room_id} not found")))
}

/// Adds a discussion member (or bumps an existing one) and returns the count
async fn insert_discussion_member(
    conn: &mut PgConnection,
    room_id: &str,
    user_id: &str,
    increment: i32,
) -> Result<i32, AppError> {
    let row = sqlx::query(
        "INSERT INTO room_participants (room_id, user_id, position, message_count) \
         VALUES ($1, $2, (SELECT COUNT(*) FROM room_participants WHERE room_id = $1), $3) \
         ON CONFLICT (room_id, user_id) \
         DO UPDATE SET message_count = room_participants.message_count + $3 \
         RETURNING message_count",
    )
    .bind(room_id)
    .bind(user_id)
    .bind(increment)
    .fetch_one(&mut *conn)
    .await?;

    Ok(row.get("message_count"))
}
