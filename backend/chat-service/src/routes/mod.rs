use axum::routing::{delete, get, post};
use axum::Router;

use crate::metrics::{metrics_handler, track_http_metrics};
use crate::realtime::handlers::ws_handler;
use crate::state::AppState;

pub mod conversations;
pub mod messages;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/conversations",
            post(conversations::create).get(conversations::list),
        )
        .route("/conversations/:id/members", get(conversations::members))
        .route("/conversations/:id/leave", post(conversations::leave))
        .route(
            "/conversations/:id/messages",
            get(messages::history).post(messages::send),
        )
        .route("/conversations/:id/typing", post(messages::typing))
        .route("/conversations/:id/stats", get(messages::stats))
        .route("/messages/:id/read", post(messages::mark_read))
        .route("/messages/:id", delete(messages::remove))
        .route("/messages/search", get(messages::search));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler))
        .nest("/api/v1", api)
        .layer(axum::middleware::from_fn(track_http_metrics))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
