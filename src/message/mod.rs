// Public API
pub use handlers::{list_messages, purge_room};

mod handlers;
pub mod models;
pub mod store;
