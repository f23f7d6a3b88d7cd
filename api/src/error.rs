use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use parlab_core::envelope::ApiEnvelope;

use crate::llm::BackendError;

/// Internal error type. Every variant renders the uniform response envelope;
/// internals are logged, never returned to the caller.
#[derive(Debug)]
pub enum AppError {
    /// Missing server configuration (500), surfaced before any I/O.
    Config(String),
    /// Missing or invalid bearer token (401).
    Auth(String),
    /// Bad input, or no calibration to generate from (400).
    Validation {
        message: String,
        field: Option<String>,
    },
    /// Upstream provider failure or retry exhaustion (502).
    Upstream {
        message: String,
        detail: serde_json::Value,
    },
    /// Storage write failure while persisting an experiment (500). Not
    /// retried; the caller resubmits.
    Persistence { message: String, detail: String },
    /// Database error (500).
    Database(sqlx::Error),
    /// Anything else (500).
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, data) = match self {
            AppError::Config(message) => {
                tracing::error!(error = %message, "configuration error");
                (StatusCode::INTERNAL_SERVER_ERROR, message, json!({}))
            }
            AppError::Auth(message) => (StatusCode::UNAUTHORIZED, message, json!({})),
            AppError::Validation { message, field } => {
                let data = match field {
                    Some(field) => json!({ "field": field }),
                    None => json!({}),
                };
                (StatusCode::BAD_REQUEST, message, data)
            }
            AppError::Upstream { message, detail } => {
                tracing::error!(detail = %detail, "upstream provider failure");
                (StatusCode::BAD_GATEWAY, message, detail)
            }
            AppError::Persistence { message, detail } => {
                tracing::error!(error = %detail, "persistence failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    message,
                    json!({ "error": detail }),
                )
            }
            AppError::Database(err) => {
                tracing::error!(error = ?err, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                    json!({}),
                )
            }
            AppError::Internal(message) => {
                tracing::error!(error = %message, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                    json!({}),
                )
            }
        };

        (
            status,
            Json(ApiEnvelope::error(status.as_u16(), message, data)),
        )
            .into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err)
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        let detail = match &err {
            BackendError::Http { status, body } => json!({ "error": body, "status": status }),
            BackendError::RateLimited => json!({ "error": "upstream rate limited after retries" }),
            BackendError::Network(e) => json!({ "error": e }),
        };
        AppError::Upstream {
            message: "LLM API failed".to_string(),
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_error_maps_to_401() {
        let response = AppError::Auth("Missing authorization header".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn validation_error_maps_to_400() {
        let response = AppError::Validation {
            message: "Prompt is required".to_string(),
            field: Some("prompt".to_string()),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn upstream_error_maps_to_502() {
        let response = AppError::from(BackendError::RateLimited).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn config_error_maps_to_500() {
        let response = AppError::Config("Server configuration error".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
