// Library crate for the anonymous chat server
// This file exposes the public API for integration tests

pub mod broker;
pub mod chat;
pub mod config;
pub mod identity;
pub mod message;
pub mod room;
pub mod shared;
pub mod websockets;

use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

// Re-export commonly used types for easier access in tests
pub use broker::{ConnectionHandle, FanoutBroker, SubscriptionHandle};
pub use chat::{ChatService, JoinOutcome};
pub use config::AppConfig;
pub use message::{models::MessageModel, store::MessageStore};
pub use room::{models::RoomModel, repository::RoomRepository};
pub use shared::{AppError, AppState};
pub use websockets::{ClientMessage, ServerMessage, SessionGateway};

/// Builds the HTTP + WebSocket router around `state`
pub fn build_router(state: AppState) -> Router {
    let identified = Router::new()
        .route("/rooms/direct", post(room::create_direct_room))
        .route("/discussions/:topic", post(room::get_or_create_discussion))
        .route(
            "/rooms/:room_id",
            get(room::get_room).delete(message::purge_room),
        )
        .route("/rooms/:room_id/close", post(room::close_room))
        .route("/rooms/:room_id/messages", get(message::list_messages))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            identity::require_identity,
        ));

    let router = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/ws", get(websockets::websocket_handler))
        .merge(identified)
        .layer(TraceLayer::new_for_http());

    let router = match cors_layer(state.config.cors_allow_origin.as_deref()) {
        Some(cors) => router.layer(cors),
        None => router,
    };

    router.with_state(state)
}

fn cors_layer(origin: Option<&str>) -> Option<CorsLayer> {
    let origin = origin?;
    if origin == "*" {
        return Some(CorsLayer::new().allow_origin(Any).allow_headers(Any).allow_methods(Any));
    }
    match HeaderValue::from_str(origin) {
        Ok(value) => Some(
            CorsLayer::new()
                .allow_origin(value)
                .allow_headers(Any)
                .allow_methods(Any),
        ),
        Err(e) => {
            warn!(origin = %origin, error = %e, "Ignoring invalid CORS_ALLOW_ORIGIN");
            None
        }
    }
}
