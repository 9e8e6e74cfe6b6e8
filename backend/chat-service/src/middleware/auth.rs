//! Bearer-token extractor for the HTTP surface.
//!
//! Handlers that take [`AuthUser`] are authenticated; `/health`, `/metrics`
//! and the websocket upgrade (which carries its token as a query parameter)
//! simply never extract it.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::auth::Identity;
use crate::error::AppError;
use crate::state::AppState;

pub struct AuthUser(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Unauthorized)?;
        let token = header.strip_prefix("Bearer ").ok_or(AppError::Unauthorized)?;
        let identity = state.verifier.verify(token).await?;
        Ok(AuthUser(identity))
    }
}
