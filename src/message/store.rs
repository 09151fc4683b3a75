use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, instrument};

use super::models::MessageModel;
use crate::shared::{poisoned, AppError};

/// Append-only per-room message log
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Assigns id and timestamp and persists the message. Appends to one room
    /// receive strictly increasing `(created_at, id)` keys in call order.
    async fn append(
        &self,
        room_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<MessageModel, AppError>;

    /// Full history, or only messages with `id > since_id`, oldest first
    async fn list_messages(
        &self,
        room_id: &str,
        since_id: Option<i64>,
    ) -> Result<Vec<MessageModel>, AppError>;

    /// Returns how many messages were removed
    async fn delete_room_history(&self, room_id: &str) -> Result<u64, AppError>;
}

type RoomLog = Arc<Mutex<Vec<MessageModel>>>;

/// In-memory message log, one lock per room
pub struct InMemoryMessageStore {
    logs: RwLock<HashMap<String, RoomLog>>,
    next_id: AtomicI64,
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    fn log(&self, room_id: &str) -> Result<Option<RoomLog>, AppError> {
        let logs = self.logs.read().map_err(poisoned)?;
        Ok(logs.get(room_id).cloned())
    }

    fn log_or_create(&self, room_id: &str) -> Result<RoomLog, AppError> {
        if let Some(log) = self.log(room_id)? {
            return Ok(log);
        }
        let mut logs = self.logs.write().map_err(poisoned)?;
        Ok(Arc::clone(logs.entry(room_id.to_string()).or_default()))
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    #[instrument(skip(self, content))]
    async fn append(
        &self,
        room_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<MessageModel, AppError> {
        let log = self.log_or_create(room_id)?;
        let mut log = log.lock().map_err(poisoned)?;

        // Id and timestamp are taken under the room lock so the log stays sorted
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let created_at = log
            .last()
            .map(|last| last.created_at.max(now))
            .unwrap_or(now);

        let message = MessageModel {
            id,
            room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            created_at,
        };
        log.push(message.clone());

        debug!(room_id = %room_id, message_id = id, "Message appended");
        Ok(message)
    }

    #[instrument(skip(self))]
    async fn list_messages(
        &self,
        room_id: &str,
        since_id: Option<i64>,
    ) -> Result<Vec<MessageModel>, AppError> {
        let Some(log) = self.log(room_id)? else {
            return Ok(Vec::new());
        };
        let log = log.lock().map_err(poisoned)?;

        Ok(log
            .iter()
            .filter(|message| since_id.map_or(true, |since| message.id > since))
            .cloned()
            .collect())
    }

    #[instrument(skip(self))]
    async fn delete_room_history(&self, room_id: &str) -> Result<u64, AppError> {
        let removed = self.logs.write().map_err(poisoned)?.remove(room_id);
        let count = match removed {
            Some(log) => log.lock().map_err(poisoned)?.len() as u64,
            None => 0,
        };

        info!(room_id = %room_id, deleted = count, "Room history purged");
        Ok(count)
    }
}

/// PostgreSQL message log.
///
/// Appends to one room are serialized with a transaction-scoped advisory
/// lock, so the `BIGSERIAL` id and the clamped timestamp both grow in
/// append order.
pub struct PostgresMessageStore {
    pool: PgPool,
}

impl PostgresMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn message_from_row(row: &PgRow) -> MessageModel {
    let created_at: DateTime<Utc> = row.get("created_at");
    MessageModel {
        id: row.get("id"),
        room_id: row.get("room_id"),
        sender_id: row.get("sender_id"),
        content: row.get("content"),
        created_at,
    }
}

#[async_trait]
impl MessageStore for PostgresMessageStore {
    #[instrument(skip(self, content))]
    async fn append(
        &self,
        room_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<MessageModel, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(room_id)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(
            "INSERT INTO messages (room_id, sender_id, content, created_at) \
             VALUES ($1, $2, $3, GREATEST(clock_timestamp(), \
                 (SELECT MAX(created_at) FROM messages WHERE room_id = $1))) \
             RETURNING id, room_id, sender_id, content, created_at",
        )
        .bind(room_id)
        .bind(sender_id)
        .bind(content)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let message = message_from_row(&row);
        debug!(room_id = %room_id, message_id = message.id, "Message appended to database");
        Ok(message)
    }

    #[instrument(skip(self))]
    async fn list_messages(
        &self,
        room_id: &str,
        since_id: Option<i64>,
    ) -> Result<Vec<MessageModel>, AppError> {
        let rows = sqlx::query(
            "SELECT id, room_id, sender_id, content, created_at FROM messages \
             WHERE room_id = $1 AND ($2::BIGINT IS NULL OR id > $2) \
             ORDER BY created_at, id",
        )
        .bind(room_id)
        .bind(since_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(message_from_row).collect())
    }

    #[instrument(skip(self))]
    async fn delete_room_history(&self, room_id: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM messages WHERE room_id = $1")
            .bind(room_id)
            .execute(&self.pool)
            .await?;

        info!(room_id = %room_id, deleted = result.rows_affected(), "Room history purged from database");
        Ok(result.rows_affected())
    }
}
