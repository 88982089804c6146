//! Authentication API handlers
//!
//! Registration, login, token refresh and logout are public; identity
//! lookups require a valid access token.

use crate::audit::ClientInfo;
use crate::auth::{
    AuthService, AuthenticatedUser, LoginRequest, RefreshRequest, RegisterRequest,
};
use crate::error::{ApiJson, ApiQuery, AppError};
use crate::state::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Plain confirmation body
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Query string of `GET /auth/users`
#[derive(Debug, Default, Deserialize)]
pub struct ListUsersQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Query string of `GET /auth/users/search`
#[derive(Debug, Default, Deserialize)]
pub struct SearchUserQuery {
    pub email: Option<String>,
}

/// Register a new identity
///
/// # Responses
///
/// * `201 Created` - identity created, token pair issued
/// * `400 Bad Request` - missing field, duplicate email or weak credentials
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let service = AuthService::from_state(&state);
    let response = service
        .register(request, &ClientInfo::from_headers(&headers))
        .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// Authenticate with email and password
///
/// Each successful login opens a new session; existing sessions are kept.
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let service = AuthService::from_state(&state);
    let response = service
        .login(request, &ClientInfo::from_headers(&headers))
        .await?;

    Ok(Json(response))
}

/// Mint a new access token from a refresh token
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let service = AuthService::from_state(&state);
    let response = service
        .refresh(request, &ClientInfo::from_headers(&headers))
        .await?;

    Ok(Json(response))
}

/// Revoke a refresh token and its session
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let service = AuthService::from_state(&state);
    service
        .logout(request, &ClientInfo::from_headers(&headers))
        .await?;

    Ok(Json(MessageResponse::new("Logged out successfully")))
}

/// Profile of the caller
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, AppError> {
    let service = AuthService::from_state(&state);
    Ok(Json(service.get_user(user.user_id).await?))
}

/// Paginated identity listing
pub async fn list_users_handler(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<ListUsersQuery>,
) -> Result<impl IntoResponse, AppError> {
    let service = AuthService::from_state(&state);
    Ok(Json(service.list_users(query.page, query.limit).await?))
}

/// Look an identity up by email
pub async fn search_user_handler(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<SearchUserQuery>,
) -> Result<impl IntoResponse, AppError> {
    let service = AuthService::from_state(&state);
    Ok(Json(service.find_by_email(query.email).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_response_serialization() {
        let json = serde_json::to_value(MessageResponse::new("Logged out successfully")).unwrap();
        assert_eq!(json, serde_json::json!({"message": "Logged out successfully"}));
    }

    #[test]
    fn test_refresh_request_uses_camel_case() {
        let request: RefreshRequest =
            serde_json::from_value(serde_json::json!({"refreshToken": "abc"})).unwrap();
        assert_eq!(request.refresh_token.as_deref(), Some("abc"));

        let empty: RefreshRequest = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(empty.refresh_token.is_none());
    }

    #[test]
    fn test_list_users_query_defaults() {
        let query: ListUsersQuery = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(query.page.is_none());
        assert!(query.limit.is_none());
    }
}
