use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::{debug, instrument, warn};

use crate::shared::{AppError, AppState};

/// Where a token was found; the upgrade handler must echo a subprotocol token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    Bearer(String),
    Subprotocol(String),
    Query(String),
}

impl TokenSource {
    pub fn token(&self) -> &str {
        match self {
            TokenSource::Bearer(token) | TokenSource::Subprotocol(token) | TokenSource::Query(token) => {
                token
            }
        }
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(String::from)
}

/// First entry of `Sec-WebSocket-Protocol`
pub fn subprotocol_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').map(str::trim).find(|v| !v.is_empty()))
        .map(String::from)
}

/// Token lookup order: subprotocol, bearer header, `?token=`
pub fn find_token(headers: &HeaderMap, query_token: Option<String>) -> Option<TokenSource> {
    subprotocol_token(headers)
        .map(TokenSource::Subprotocol)
        .or_else(|| bearer_token(headers).map(TokenSource::Bearer))
        .or_else(|| {
            query_token
                .filter(|token| !token.trim().is_empty())
                .map(TokenSource::Query)
        })
}

/// Identity middleware: decodes the bearer token and inserts `Identity`.
/// Usage: .layer(middleware::from_fn_with_state(state.clone(), identity::require_identity))
#[instrument(skip(state, req, next))]
pub async fn require_identity(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers()).ok_or_else(|| {
        warn!(uri = %req.uri(), "Missing bearer token");
        AppError::Unauthorized("Missing authorization header".to_string())
    })?;

    let identity = state.identity.decode_token(&token)?;
    debug!(user_id = %identity.user_id, "Request identified");

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
