//! Unified API error response format shared by every service.
//!
//! Handlers map their domain errors into this body so clients see a single
//! shape regardless of which service produced the failure.

use serde::{Deserialize, Serialize};

/// Stable error codes for client-side routing and localization.
pub mod error_codes {
    pub const INVALID_CREDENTIALS: &str = "INVALID_CREDENTIALS";
    pub const NOT_MEMBER: &str = "NOT_MEMBER";
    pub const INVALID_CONVERSATION_TYPE: &str = "INVALID_CONVERSATION_TYPE";
    pub const WRONG_PRIVATE_MEMBER_COUNT: &str = "WRONG_PRIVATE_MEMBER_COUNT";
    pub const UNKNOWN_CREATOR: &str = "UNKNOWN_CREATOR";
    pub const INVALID_MEMBER: &str = "INVALID_MEMBER";
    pub const MESSAGE_NOT_FOUND: &str = "MESSAGE_NOT_FOUND";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const ENCRYPTION_ERROR: &str = "ENCRYPTION_ERROR";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
}

/// JSON body returned for every failed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short status label, e.g. "Forbidden".
    pub error: String,

    /// Human-readable message.
    pub message: String,

    /// HTTP status code.
    pub status: u16,

    /// Coarse category for client routing:
    /// "validation_error", "authentication_error", "authorization_error",
    /// "not_found_error", "conflict_error", "server_error".
    pub error_type: String,

    /// Stable code from [`error_codes`].
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// Request trace id for log correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, status: u16, error_type: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            status,
            error_type: error_type.to_string(),
            code: code.to_string(),
            details: None,
            trace_id: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_fields_are_omitted() {
        let body = ErrorResponse::new(
            "Forbidden",
            "not a member of this conversation",
            403,
            "authorization_error",
            error_codes::NOT_MEMBER,
        );
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["status"], 403);
        assert_eq!(json["code"], "NOT_MEMBER");
        assert!(json.get("details").is_none());
        assert!(json.get("trace_id").is_none());
    }
}
