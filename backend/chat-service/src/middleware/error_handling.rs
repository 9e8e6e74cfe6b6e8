//! Maps domain errors to the shared [`ErrorResponse`] wire format.

use axum::http::StatusCode;
use axum::Json;
use error_types::{error_codes, ErrorResponse};
use tracing::error;

use crate::error::AppError;

pub fn into_response(err: AppError) -> (StatusCode, Json<ErrorResponse>) {
    let status = StatusCode::from_u16(err.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(error = %err, retryable = err.is_retryable(), "request failed");
    }

    let (label, error_type, code) = classify(&err);
    // Internal failure text never reaches the client.
    let message = if status.is_server_error() {
        match &err {
            AppError::Encryption(_) => "message could not be processed".to_string(),
            _ => "internal server error".to_string(),
        }
    } else {
        err.to_string()
    };

    (
        status,
        Json(ErrorResponse::new(
            label,
            &message,
            status.as_u16(),
            error_type,
            code,
        )),
    )
}

fn classify(err: &AppError) -> (&'static str, &'static str, &'static str) {
    match err {
        AppError::BadRequest(_) => ("Bad Request", "validation_error", error_codes::INVALID_REQUEST),
        AppError::InvalidConversationType(_) => (
            "Bad Request",
            "validation_error",
            error_codes::INVALID_CONVERSATION_TYPE,
        ),
        AppError::WrongPrivateMemberCount(_) => (
            "Bad Request",
            "validation_error",
            error_codes::WRONG_PRIVATE_MEMBER_COUNT,
        ),
        AppError::UnknownCreator(_) => {
            ("Bad Request", "validation_error", error_codes::UNKNOWN_CREATOR)
        }
        AppError::InvalidMember(_) => {
            ("Bad Request", "validation_error", error_codes::INVALID_MEMBER)
        }
        AppError::Unauthorized => (
            "Unauthorized",
            "authentication_error",
            error_codes::INVALID_CREDENTIALS,
        ),
        AppError::NotMember => ("Forbidden", "authorization_error", error_codes::NOT_MEMBER),
        AppError::NotFound => ("Not Found", "not_found_error", error_codes::MESSAGE_NOT_FOUND),
        AppError::Database(_) => (
            "Internal Server Error",
            "server_error",
            error_codes::DATABASE_ERROR,
        ),
        AppError::Encryption(_) => (
            "Internal Server Error",
            "server_error",
            error_codes::ENCRYPTION_ERROR,
        ),
        AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => (
            "Internal Server Error",
            "server_error",
            error_codes::INTERNAL_SERVER_ERROR,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_member_maps_to_forbidden() {
        let (status, Json(body)) = into_response(AppError::NotMember);
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.code, error_codes::NOT_MEMBER);
        assert_eq!(body.error_type, "authorization_error");
    }

    #[test]
    fn database_details_are_not_leaked() {
        let (status, Json(body)) = into_response(AppError::Database(sqlx::Error::PoolClosed));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.message, "internal server error");
        assert_eq!(body.code, error_codes::DATABASE_ERROR);
    }

    #[test]
    fn validation_errors_keep_their_message() {
        let (status, Json(body)) = into_response(AppError::WrongPrivateMemberCount(3));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.message.contains("exactly 2"));
        assert_eq!(body.code, error_codes::WRONG_PRIVATE_MEMBER_COUNT);
    }
}
