//! Test doubles for the storage and transport seams
#![allow(dead_code)] // Test utilities may not all be used in every test

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use anony_chat::{
    message::store::{InMemoryMessageStore, MessageStore},
    websockets::{InboundFrame, SocketError, SocketWrapper},
    AppError, MessageModel,
};

// ============================================================================
// Mock Infrastructure
// ============================================================================

/// Message store whose next `failures` appends fail with a persistence error
pub struct FailingMessageStore {
    inner: InMemoryMessageStore,
    failures: AtomicU32,
}

impl FailingMessageStore {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: InMemoryMessageStore::new(),
            failures: AtomicU32::new(failures),
        }
    }

    pub fn fail_next(&self, failures: u32) {
        self.failures.store(failures, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageStore for FailingMessageStore {
    async fn append(
        &self,
        room_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<MessageModel, AppError> {
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(AppError::PersistenceFailure("write rejected".to_string()));
        }
        self.inner.append(room_id, sender_id, content).await
    }

    async fn list_messages(
        &self,
        room_id: &str,
        since_id: Option<i64>,
    ) -> Result<Vec<MessageModel>, AppError> {
        self.inner.list_messages(room_id, since_id).await
    }

    async fn delete_room_history(&self, room_id: &str) -> Result<u64, AppError> {
        self.inner.delete_room_history(room_id).await
    }
}

/// Socket driven by a channel of client frames; records every server frame
pub struct MockSocket {
    inbound: mpsc::UnboundedReceiver<InboundFrame>,
    sent: Arc<Mutex<Vec<String>>>,
}

/// Client side of a `MockSocket`
pub struct MockClient {
    pub inbound: mpsc::UnboundedSender<InboundFrame>,
    pub sent: Arc<Mutex<Vec<String>>>,
}

impl MockSocket {
    pub fn pair() -> (Self, MockClient) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                inbound: inbound_rx,
                sent: Arc::clone(&sent),
            },
            MockClient {
                inbound: inbound_tx,
                sent,
            },
        )
    }
}

impl MockClient {
    pub fn send_frame(&self, frame: serde_json::Value) {
        self.inbound
            .send(InboundFrame::Text(frame.to_string()))
            .expect("connection loop is gone");
    }

    pub fn received(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }
}

#[async_trait]
impl SocketWrapper for MockSocket {
    async fn send_message(&mut self, message: String) -> Result<(), SocketError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn receive_message(&mut self) -> Result<Option<InboundFrame>, SocketError> {
        Ok(self.inbound.recv().await)
    }

    async fn close(&mut self) -> Result<(), SocketError> {
        Ok(())
    }
}
