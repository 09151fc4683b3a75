use tokio::sync::mpsc;
use uuid::Uuid;

use crate::shared::AppError;
use crate::websockets::ServerMessage;

pub type ConnectionId = Uuid;

/// Outbound side of one live client connection.
///
/// Cloning is cheap; every clone feeds the same socket writer.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: String,
    sender: mpsc::UnboundedSender<ServerMessage>,
}

impl ConnectionHandle {
    pub fn new(user_id: impl Into<String>, sender: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            sender,
        }
    }

    /// Creates a handle together with the receiver its socket writer drains
    pub fn channel(user_id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(user_id, sender), receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Queues an event for the client without waiting on the socket
    pub fn deliver(&self, message: ServerMessage) -> Result<(), AppError> {
        self.sender
            .send(message)
            .map_err(|_| AppError::TransportFailure(format!("connection {} is gone", self.id)))
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
