// Public API
pub use service::{ChatService, JoinOutcome};

mod lanes;
mod service;
