// Public API - what other modules can use
pub use handlers::{close_room, create_direct_room, get_or_create_discussion, get_room};

// Internal modules
mod handlers;
pub mod models;
pub mod policy;
pub mod repository;
pub mod service;
pub mod types;
