use crate::middleware::error_handling;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use uuid::Uuid;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error_handling::into_response(self).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not a member of this conversation")]
    NotMember,

    #[error("not found")]
    NotFound,

    #[error("invalid conversation type: {0}")]
    InvalidConversationType(String),

    #[error("a private conversation must have exactly 2 members, got {0}")]
    WrongPrivateMemberCount(usize),

    #[error("creator {0} does not exist")]
    UnknownCreator(Uuid),

    #[error("member {0} does not exist")]
    InvalidMember(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("internal server error")]
    Internal,
}

impl AppError {
    /// Whether the caller may retry (transactional/pool failures roll back fully).
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            AppError::Internal => true,
            _ => false,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_)
            | AppError::InvalidConversationType(_)
            | AppError::WrongPrivateMemberCount(_)
            | AppError::UnknownCreator(_)
            | AppError::InvalidMember(_) => 400,
            AppError::Unauthorized => 401,
            AppError::NotMember => 403,
            AppError::NotFound => 404,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Database(_)
            | AppError::Encryption(_)
            | AppError::Internal => 500,
        }
    }
}
