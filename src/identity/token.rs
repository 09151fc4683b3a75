use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::types::{Identity, IdentityClaims};
use crate::shared::AppError;

/// HS256 keys shared with the auth collaborator
#[derive(Clone)]
pub struct IdentityConfig {
    secret: Arc<str>,
}

impl IdentityConfig {
    pub fn new(secret: impl AsRef<str>) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
        }
    }

    /// Decodes a token and resolves the caller's user id
    #[instrument(skip(self, token))]
    pub fn decode_token(&self, token: &str) -> Result<Identity, AppError> {
        let claims = decode::<IdentityClaims>(
            token.trim(),
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| {
            debug!(error = %e, "Failed to decode identity token");
            AppError::Unauthorized(e.to_string())
        })?
        .claims;

        let user_id = claims.user_id().ok_or_else(|| {
            debug!("Identity token carries no user id");
            AppError::Unauthorized("Token carries no user id".to_string())
        })?;

        Ok(Identity {
            user_id: user_id.to_string(),
            username: claims.username.clone(),
        })
    }

    /// Issues a token the way the auth collaborator does; used by tests and tooling
    pub fn issue_token(&self, user_id: &str, valid_for: Duration) -> Result<String, AppError> {
        let claims = IdentityClaims {
            id: Some(user_id.to_string()),
            sub: None,
            username: None,
            exp: (Utc::now() + valid_for).timestamp().max(0) as usize,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| {
            debug!(error = %e, "Failed to encode identity token");
            AppError::Internal
        })
    }
}
