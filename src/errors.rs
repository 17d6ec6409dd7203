// src/errors.rs
use crate::services::availability::AvailabilityError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced at the HTTP boundary. Every variant renders as
/// `{ "success": false, "message": ..., ... }`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unavailable(#[from] AvailabilityError),
    #[error("{message}")]
    TooManyRequests { message: String, retry_after: u64 },
    #[error("{context}")]
    Internal { context: String, detail: String },
    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Unavailable(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal { .. } | ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            // 23505 = unique_violation
            if db_err.code().as_deref() == Some("23505") {
                let message = match db_err.constraint() {
                    Some("sessions_active_slot_idx") => {
                        "Counselor already has an active session at this date and time"
                    }
                    Some("users_email_key") => "User with this email already exists",
                    Some("profiles_user_id_key") => "Profile already exists for this user",
                    Some("conversations_counselor_id_patient_id_key") => {
                        "Conversation already exists for this counselor and patient"
                    }
                    _ => "Duplicate record",
                };
                return ApiError::Conflict(message.to_string());
            }
        }
        ApiError::Database(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            ApiError::Unavailable(reason) => json!({
                "success": false,
                "message": reason.to_string(),
                "reason": reason.tag(),
            }),
            ApiError::TooManyRequests { message, retry_after } => json!({
                "success": false,
                "message": message,
                "retryAfter": retry_after,
            }),
            ApiError::Internal { context, detail } => {
                tracing::error!(error = %detail, "{}", context);
                json!({
                    "success": false,
                    "message": context,
                    "error": detail,
                })
            }
            ApiError::Database(err) => {
                tracing::error!(error = %err, "database error");
                json!({
                    "success": false,
                    "message": "Internal server error",
                    "error": err.to_string(),
                })
            }
            other => json!({
                "success": false,
                "message": other.to_string(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

/// Attach a request-level message to an unexpected failure, mirroring the
/// `{ message: "Error fetching ...", error: <detail> }` envelope.
pub trait Context<T> {
    fn context(self, message: &str) -> ApiResult<T>;
}

impl<T, E: std::fmt::Display> Context<T> for Result<T, E> {
    fn context(self, message: &str) -> ApiResult<T> {
        self.map_err(|e| ApiError::Internal {
            context: message.to_string(),
            detail: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::bad_request("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::forbidden("x").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Conflict("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::TooManyRequests { message: "x".into(), retry_after: 30 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::Unavailable(AvailabilityError::InvalidTime).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(sqlx::Error::RowNotFound).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_context_wraps_detail() {
        let result: Result<(), String> = Err("boom".to_string());
        match result.context("Error fetching sessions") {
            Err(ApiError::Internal { context, detail }) => {
                assert_eq!(context, "Error fetching sessions");
                assert_eq!(detail, "boom");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
