use std::sync::Arc;

use tracing::info;

use chat_service::auth::JwtVerifier;
use chat_service::config::Config;
use chat_service::db;
use chat_service::error::AppError;
use chat_service::logging::init_tracing;
use chat_service::realtime::PresenceRegistry;
use chat_service::routes;
use chat_service::services::chat_service::ChatService;
use chat_service::services::encryption::EncryptionService;
use chat_service::services::notification_dispatch::{LogPushProvider, NotificationDispatcher};
use chat_service::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_tracing();

    let config = Arc::new(Config::from_env()?);

    let pool = db::init_pool(&config.database_url).await?;
    db::MIGRATOR
        .run(&pool)
        .await
        .map_err(|e| AppError::StartServer(format!("migrations failed: {e}")))?;
    info!("database ready");

    let encryption = Arc::new(EncryptionService::new(config.encryption_master_key));
    let presence = PresenceRegistry::new();
    let notifier = NotificationDispatcher::spawn(pool.clone(), Arc::new(LogPushProvider));
    let chat = ChatService::new(pool.clone(), encryption, presence.clone(), notifier);
    let verifier = Arc::new(JwtVerifier::new(&config.jwt_secret));

    let state = AppState {
        db: pool,
        config: config.clone(),
        chat,
        presence,
        verifier,
    };

    let app = routes::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::StartServer(format!("bind {addr}: {e}")))?;
    info!(%addr, "chat-service listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::StartServer(e.to_string()))?;
    Ok(())
}
