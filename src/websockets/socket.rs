use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use super::messages::ServerMessage;

/// One frame read from the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    /// Ping, pong or binary: proves liveness, carries no request
    Keepalive,
}

/// Simple WebSocket abstraction - all we care about is send/receive
#[async_trait]
pub trait SocketWrapper: Send {
    /// Send a text message to the client
    async fn send_message(&mut self, message: String) -> Result<(), SocketError>;

    /// Receive the next frame from the client (None if connection closed)
    async fn receive_message(&mut self) -> Result<Option<InboundFrame>, SocketError>;

    /// Close the connection
    async fn close(&mut self) -> Result<(), SocketError>;
}

/// Per-connection protocol logic driven by `Connection::run`
#[async_trait]
pub trait MessageHandler: Send {
    /// Handle one text frame from the client
    async fn handle_message(&mut self, message: String);

    /// Called exactly once when the connection loop ends
    async fn on_disconnect(&mut self, reason: DisconnectReason);
}

#[derive(Debug)]
pub enum SocketError {
    ConnectionClosed,
    SendFailed(String),
    ReceiveFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientClosed,
    IdleTimeout,
    SocketError,
}

/// Direct implementation on axum's WebSocket
#[async_trait]
impl SocketWrapper for WebSocket {
    async fn send_message(&mut self, message: String) -> Result<(), SocketError> {
        self.send(Message::Text(message))
            .await
            .map_err(|e| SocketError::SendFailed(e.to_string()))
    }

    async fn receive_message(&mut self) -> Result<Option<InboundFrame>, SocketError> {
        match self.next().await {
            Some(Ok(Message::Text(text))) => Ok(Some(InboundFrame::Text(text))),
            Some(Ok(Message::Close(_))) => Ok(None),
            Some(Ok(_)) => Ok(Some(InboundFrame::Keepalive)),
            Some(Err(e)) => Err(SocketError::ReceiveFailed(e.to_string())),
            None => Ok(None), // Connection closed
        }
    }

    async fn close(&mut self) -> Result<(), SocketError> {
        self.send(Message::Close(None))
            .await
            .map_err(|e| SocketError::SendFailed(e.to_string()))
    }
}

/// Connection runs one client socket: it writes queued server events,
/// feeds inbound frames to the handler and reclaims the socket after
/// `idle_timeout` without an inbound frame.
pub struct Connection<H: MessageHandler> {
    socket: Box<dyn SocketWrapper>,
    outbound_receiver: mpsc::UnboundedReceiver<ServerMessage>,
    handler: H,
    idle_timeout: Duration,
}

impl<H: MessageHandler> Connection<H> {
    pub fn new(
        socket: Box<dyn SocketWrapper>,
        outbound_receiver: mpsc::UnboundedReceiver<ServerMessage>,
        handler: H,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            socket,
            outbound_receiver,
            handler,
            idle_timeout,
        }
    }

    /// Run the connection until the client leaves, errors or goes idle
    pub async fn run(mut self) -> Result<DisconnectReason, SocketError> {
        let mut idle_deadline = Instant::now() + self.idle_timeout;
        let mut failure = None;

        let reason = loop {
            tokio::select! {
                // Handle outbound messages (from our app to client)
                msg = self.outbound_receiver.recv() => {
                    let Some(message) = msg else {
                        break DisconnectReason::ClientClosed;
                    };
                    let text = match message.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode outbound event");
                            continue;
                        }
                    };
                    if let Err(e) = self.socket.send_message(text).await {
                        failure = Some(e);
                        break DisconnectReason::SocketError;
                    }
                }

                // Handle inbound messages (from client to our app)
                msg = self.socket.receive_message() => {
                    match msg {
                        Ok(Some(frame)) => {
                            idle_deadline = Instant::now() + self.idle_timeout;
                            if let InboundFrame::Text(message) = frame {
                                self.handler.handle_message(message).await;
                            }
                        }
                        Ok(None) => break DisconnectReason::ClientClosed,
                        Err(e) => {
                            failure = Some(e);
                            break DisconnectReason::SocketError;
                        }
                    }
                }

                _ = sleep_until(idle_deadline) => {
                    debug!(idle_timeout_ms = self.idle_timeout.as_millis() as u64, "Connection idle");
                    break DisconnectReason::IdleTimeout;
                }
            }
        };

        self.handler.on_disconnect(reason).await;
        let _ = self.socket.close().await;

        match failure {
            Some(e) => Err(e),
            None => Ok(reason),
        }
    }
}
