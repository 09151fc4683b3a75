// Public API
pub use gateway::SessionGateway;
pub use handler::websocket_handler;
pub use messages::{ClientMessage, ServerMessage};
pub use socket::{
    Connection, DisconnectReason, InboundFrame, MessageHandler, SocketError, SocketWrapper,
};

// Internal modules
mod gateway;
mod handler;
mod messages;
mod socket;
