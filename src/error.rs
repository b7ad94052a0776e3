use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// JSON error envelope returned on every failure
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Human-readable description of the failure
    pub message: String,
    /// Stable machine-readable code
    pub code: &'static str,
}

/// Errors surfaced by the API, mapped one-to-one onto HTTP responses
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    UnsupportedMediaType(String),

    #[error("content type {declared} does not match {expected} for this file extension")]
    MediaTypeMismatch { declared: String, expected: String },

    #[error("upload limit reached, retry in {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("{0}")]
    OperationNotAllowed(String),

    #[error("file uploads are disabled; reference poster images by URL in image_path instead")]
    UploadsDisabled,

    #[error("failed to issue upload credential: {0}")]
    CredentialIssuance(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Shorthand for a 404 on a named entity
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for a 400 validation failure
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::MediaTypeMismatch { .. } => StatusCode::BAD_REQUEST,
            ApiError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::OperationNotAllowed(_) => StatusCode::BAD_REQUEST,
            ApiError::UploadsDisabled => StatusCode::NOT_IMPLEMENTED,
            ApiError::CredentialIssuance(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::NotFound { .. } => "NOT_FOUND",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
            ApiError::MediaTypeMismatch { .. } => "MEDIA_TYPE_MISMATCH",
            ApiError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            ApiError::OperationNotAllowed(_) => "OPERATION_NOT_ALLOWED",
            ApiError::UploadsDisabled => "UPLOADS_DISABLED",
            ApiError::CredentialIssuance(_) => "CREDENTIAL_ISSUANCE_FAILED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(anyhow::Error::new(err))
    }
}

/// Name of the violated constraint, when the database reported one
pub(crate) fn constraint_name(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint(),
        _ => None,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        // Internal details go to the log, never to the client.
        let message = match &self {
            ApiError::Internal(err) => {
                error!(error = format!("{err:#}"), "request failed");
                "internal server error".to_string()
            }
            other => {
                if status.is_server_error() {
                    error!(error = %other, "request failed");
                }
                other.to_string()
            }
        };

        let retry_after = match &self {
            ApiError::RateLimitExceeded { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };

        let mut response = (status, Json(ErrorBody { message, code })).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_variants_map_to_documented_status_codes() {
        let cases: Vec<(ApiError, StatusCode, &str)> = vec![
            (
                ApiError::validation("bad input"),
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
            ),
            (
                ApiError::not_found("Movie", "abc"),
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            (
                ApiError::Unauthorized("no token".into()),
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
            ),
            (
                ApiError::Forbidden("not yours".into()),
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
            ),
            (
                ApiError::UnsupportedMediaType("bad ext".into()),
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "UNSUPPORTED_MEDIA_TYPE",
            ),
            (
                ApiError::MediaTypeMismatch {
                    declared: "image/jpeg".into(),
                    expected: "image/png".into(),
                },
                StatusCode::BAD_REQUEST,
                "MEDIA_TYPE_MISMATCH",
            ),
            (
                ApiError::RateLimitExceeded {
                    retry_after_secs: 60,
                },
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMIT_EXCEEDED",
            ),
            (
                ApiError::OperationNotAllowed("nope".into()),
                StatusCode::BAD_REQUEST,
                "OPERATION_NOT_ALLOWED",
            ),
            (
                ApiError::UploadsDisabled,
                StatusCode::NOT_IMPLEMENTED,
                "UPLOADS_DISABLED",
            ),
            (
                ApiError::CredentialIssuance("keys misconfigured".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "CREDENTIAL_ISSUANCE_FAILED",
            ),
            (
                ApiError::Internal(anyhow::anyhow!("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
            ),
        ];

        for (err, status, code) in cases {
            assert_eq!(err.status(), status, "status for {code}");
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn not_found_message_names_entity_and_id() {
        let err = ApiError::not_found("Movie", "1234");
        assert_eq!(err.to_string(), "Movie not found: 1234");
    }

    #[test]
    fn rate_limit_response_carries_retry_after() {
        let response = ApiError::RateLimitExceeded {
            retry_after_secs: 120,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("120")
        );
    }

    #[test]
    fn internal_error_body_is_generic() {
        let err = ApiError::Internal(anyhow::anyhow!("secret connection string"));
        let body = ErrorBody {
            message: match &err {
                ApiError::Internal(_) => "internal server error".to_string(),
                other => other.to_string(),
            },
            code: err.code(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["message"], "internal server error");
        assert_eq!(json["code"], "INTERNAL_ERROR");
    }
}
