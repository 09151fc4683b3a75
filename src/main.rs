use anony_chat::{
    build_router,
    config::AppConfig,
    message::store::{InMemoryMessageStore, MessageStore, PostgresMessageStore},
    room::repository::{InMemoryRoomRepository, PostgresRoomRepository, RoomRepository},
    AppState,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Stores = (
    Arc<dyn RoomRepository + Send + Sync>,
    Arc<dyn MessageStore + Send + Sync>,
);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "anony_chat=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting anonymous chat server");
    let config = AppConfig::from_env();

    let (room_repository, message_store) = stores(&config).await?;
    let bind_addr = config.bind_addr.clone();
    let app = build_router(AppState::new(config, room_repository, message_store));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Server running on http://{}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// PostgreSQL when DATABASE_URL is set, in-memory otherwise
async fn stores(config: &AppConfig) -> Result<Stores, Box<dyn std::error::Error>> {
    match &config.database_url {
        Some(database_url) => {
            let pool = sqlx::PgPool::connect(database_url).await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("Using PostgreSQL stores");
            Ok((
                Arc::new(PostgresRoomRepository::new(pool.clone())),
                Arc::new(PostgresMessageStore::new(pool)),
            ))
        }
        None => {
            info!("DATABASE_URL not set, using in-memory stores");
            Ok((
                Arc::new(InMemoryRoomRepository::new()),
                Arc::new(InMemoryMessageStore::new()),
            ))
        }
    }
}
