// Public API - what other modules can use
pub use middleware::{find_token, require_identity, TokenSource};
pub use token::IdentityConfig;
pub use types::{Identity, IdentityClaims};

// Internal modules
mod middleware;
mod token;
mod types;
