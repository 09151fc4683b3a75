// Public API
pub use connection::{ConnectionHandle, ConnectionId};
pub use fanout::{FanoutBroker, SubscriptionHandle};

mod connection;
mod fanout;
