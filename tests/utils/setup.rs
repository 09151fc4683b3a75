#![allow(dead_code)] // Test utilities may not all be used in every test

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use anony_chat::{
    identity::Identity,
    message::store::{InMemoryMessageStore, MessageStore},
    room::repository::InMemoryRoomRepository,
    websockets::{Connection, SessionGateway},
    AppConfig, AppState, ConnectionHandle, ServerMessage,
};

use super::mocks::{MockClient, MockSocket};

// ============================================================================
// Test Setup Infrastructure
// ============================================================================

/// One simulated client: its gateway plus everything the server sent it
pub struct TestClient {
    pub gateway: SessionGateway,
    pub outbox: UnboundedReceiver<ServerMessage>,
}

impl TestClient {
    /// Events queued since the last call
    pub fn take_events(&mut self) -> Vec<ServerMessage> {
        let mut events = Vec::new();
        while let Ok(event) = self.outbox.try_recv() {
            events.push(event);
        }
        events
    }
}

pub struct TestSetup {
    pub state: AppState,
    pub clients: HashMap<String, TestClient>,
}

pub struct TestSetupBuilder {
    config: AppConfig,
    message_store: Option<Arc<dyn MessageStore + Send + Sync>>,
    users: Vec<String>,
}

impl TestSetupBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            message_store: None,
            users: vec![],
        }
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.config = self.config.with_closure_threshold(threshold);
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.config = self.config.with_idle_timeout(idle_timeout);
        self
    }

    pub fn with_message_store(mut self, store: Arc<dyn MessageStore + Send + Sync>) -> Self {
        self.message_store = Some(store);
        self
    }

    pub fn with_users(mut self, users: Vec<&str>) -> Self {
        self.users = users.into_iter().map(String::from).collect();
        self
    }

    pub fn with_alice_and_bob(self) -> Self {
        self.with_users(vec!["alice", "bob"])
    }

    pub fn build(self) -> TestSetup {
        let state = AppState::new(
            self.config,
            Arc::new(InMemoryRoomRepository::new()),
            self.message_store
                .unwrap_or_else(|| Arc::new(InMemoryMessageStore::new())),
        );

        let mut setup = TestSetup {
            state,
            clients: HashMap::new(),
        };
        for user in self.users {
            setup.connect(&user);
        }
        setup
    }
}

impl TestSetup {
    /// Opens a fresh connection for `user_id`, replacing any earlier one
    pub fn connect(&mut self, user_id: &str) {
        let (handle, outbox) = ConnectionHandle::channel(user_id);
        let gateway = SessionGateway::new(identity(user_id), handle, self.state.chat_service.clone());
        self.clients
            .insert(user_id.to_string(), TestClient { gateway, outbox });
    }

    /// Drops the client's receiving end without a clean leave
    pub fn kill_connection(&mut self, user_id: &str) -> SessionGateway {
        let client = self
            .clients
            .remove(user_id)
            .unwrap_or_else(|| panic!("{user_id} is not connected"));
        drop(client.outbox);
        client.gateway
    }

    pub fn client(&mut self, user_id: &str) -> &mut TestClient {
        self.clients
            .get_mut(user_id)
            .unwrap_or_else(|| panic!("{user_id} is not connected"))
    }

    /// Runs a full connection loop over a mock socket for `user_id`
    pub fn spawn_socket_connection(
        &self,
        user_id: &str,
    ) -> (MockClient, tokio::task::JoinHandle<()>) {
        let (socket, client) = MockSocket::pair();
        let (handle, outbox) = ConnectionHandle::channel(user_id);
        let gateway = SessionGateway::new(identity(user_id), handle, self.state.chat_service.clone());
        let connection = Connection::new(
            Box::new(socket),
            outbox,
            gateway,
            self.state.config.idle_timeout,
        );

        let task = tokio::spawn(async move {
            let _ = connection.run().await;
        });
        (client, task)
    }

    pub async fn direct_chat(&self, first: &str, second: &str) -> String {
        self.state
            .room_service
            .create_direct_chat(first, second)
            .await
            .unwrap()
            .id
    }

    pub async fn discussion(&self, topic: &str) -> String {
        self.state
            .room_service
            .get_or_create_discussion(topic)
            .await
            .unwrap()
            .id
    }
}

pub fn identity(user_id: &str) -> Identity {
    Identity {
        user_id: user_id.to_string(),
        username: None,
    }
}
