use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;
use tracing::{info, warn};

use super::gateway::SessionGateway;
use super::socket::Connection;
use crate::broker::ConnectionHandle;
use crate::identity::{find_token, Identity, TokenSource};
use crate::shared::{AppError, AppState};

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    pub token: Option<String>,
}

/// WebSocket endpoint; the identity token comes from the
/// Sec-WebSocket-Protocol header, a Bearer header or `?token=`
///
/// GET /ws
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<WebSocketQuery>,
    State(app_state): State<AppState>,
) -> Result<Response, AppError> {
    let source = find_token(&headers, query.token).ok_or_else(|| {
        warn!("WebSocket request without identity token");
        AppError::Unauthorized("Missing authentication token".to_string())
    })?;

    let identity = app_state.identity.decode_token(source.token())?;
    info!(user_id = %identity.user_id, "WebSocket authentication successful");

    // Browsers drop the socket unless the offered subprotocol is echoed back
    let ws = match source {
        TokenSource::Subprotocol(token) => ws.protocols([token]),
        TokenSource::Bearer(_) | TokenSource::Query(_) => ws,
    };

    Ok(ws.on_upgrade(move |socket| handle_websocket_connection(socket, identity, app_state)))
}

/// Handle the upgraded WebSocket connection
async fn handle_websocket_connection(
    socket: axum::extract::ws::WebSocket,
    identity: Identity,
    app_state: AppState,
) {
    let user_id = identity.user_id.clone();
    let (handle, outbound_receiver) = ConnectionHandle::channel(user_id.clone());
    let connection_id = handle.id();
    info!(user_id = %user_id, connection_id = %connection_id, "WebSocket connection established");

    let gateway = SessionGateway::new(identity, handle, app_state.chat_service.clone());
    let connection = Connection::new(
        Box::new(socket),
        outbound_receiver,
        gateway,
        app_state.config.idle_timeout,
    );

    match connection.run().await {
        Ok(reason) => {
            info!(
                user_id = %user_id,
                connection_id = %connection_id,
                reason = ?reason,
                "WebSocket connection closed"
            );
        }
        Err(e) => {
            warn!(
                user_id = %user_id,
                connection_id = %connection_id,
                error = ?e,
                "WebSocket connection error"
            );
        }
    }
}

