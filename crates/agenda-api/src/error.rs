//! API error handling

use crate::auth::jwt::JwtError;
use crate::auth::password::PasswordError;
use agenda_core::AgendaError;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequest, FromRequestParts,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// API error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Human-readable message
    pub message: String,
    /// Underlying failure, when there is one worth reporting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    /// Request body could not be decoded
    InvalidBody(String),
    /// Query string could not be decoded
    InvalidQuery(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Internal(String),
    Database(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::InvalidBody(_) | AppError::InvalidQuery(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg) => ApiError::new(msg),
            AppError::InvalidBody(detail) => ApiError::new("Invalid request body").with_error(detail),
            AppError::InvalidQuery(detail) => {
                ApiError::new("Invalid query parameters").with_error(detail)
            }
            AppError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error");
                ApiError::new("Internal server error").with_error(detail)
            }
            AppError::Database(detail) => {
                tracing::error!(error = %detail, "Store operation failed");
                ApiError::new("Database operation failed").with_error(detail)
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<AgendaError> for AppError {
    fn from(err: AgendaError) -> Self {
        match err {
            AgendaError::NotFound(msg) => AppError::NotFound(msg),
            AgendaError::Conflict(msg) => AppError::BadRequest(msg),
            AgendaError::ValidationError(msg) => AppError::BadRequest(msg),
            AgendaError::DatabaseError(msg) => AppError::Database(msg),
            AgendaError::Serialization(err) => AppError::Internal(err.to_string()),
            AgendaError::Other(err) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidBody(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::InvalidQuery(rejection.body_text())
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<JwtError> for AppError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::EncodingError(_) | JwtError::SystemTimeError(_) => {
                AppError::Internal(err.to_string())
            }
            JwtError::InvalidToken | JwtError::ExpiredToken | JwtError::InvalidSignature => {
                AppError::Forbidden("Invalid token".to_string())
            }
        }
    }
}

/// JSON body extractor whose rejections use the API error body
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// Query string extractor whose rejections use the API error body
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_client_errors_carry_message_only() {
        let response = AppError::NotFound("Calendar not found".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let json = body_json(response).await;
        assert_eq!(json["message"], "Calendar not found");
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn test_server_errors_expose_detail() {
        let response = AppError::Database("connection reset".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["message"], "Database operation failed");
        assert_eq!(json["error"], "connection reset");
    }

    #[tokio::test]
    async fn test_query_errors_use_json_body() {
        let response = AppError::InvalidQuery("invalid digit found in string".to_string())
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["message"], "Invalid query parameters");
        assert_eq!(json["error"], "invalid digit found in string");
    }

    #[test]
    fn test_agenda_error_mapping() {
        let cases = [
            (AgendaError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AgendaError::Conflict("x".into()), StatusCode::BAD_REQUEST),
            (AgendaError::ValidationError("x".into()), StatusCode::BAD_REQUEST),
            (
                AgendaError::DatabaseError("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                AgendaError::Other(anyhow::anyhow!("x")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn test_jwt_error_mapping() {
        assert_eq!(
            AppError::from(JwtError::ExpiredToken).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::from(JwtError::InvalidSignature).status(),
            StatusCode::FORBIDDEN
        );
    }
}
