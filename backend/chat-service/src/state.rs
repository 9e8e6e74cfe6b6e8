use std::sync::Arc;

use sqlx::{Pool, Postgres};

use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::realtime::PresenceRegistry;
use crate::services::chat_service::ChatService;

/// Shared application state handed to every route and socket session.
#[derive(Clone)]
pub struct AppState {
    pub db: Pool<Postgres>,
    pub config: Arc<Config>,
    pub chat: ChatService,
    pub presence: PresenceRegistry,
    pub verifier: Arc<dyn TokenVerifier>,
}
