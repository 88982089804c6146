/// Authentication middleware for protecting routes
///
/// Reads the token from the Authorization header, checks it against the
/// revocation log and the session table, and on success adds the caller to
/// request extensions.
use super::jwt::{hash_token, verify_access_token, Claims, JwtError};
use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::error::ApiError;
use crate::state::AppState;
use agenda_core::{AgendaError, IdentityId};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Authenticated caller extracted from a verified access token
///
/// Handlers take it with `Extension<AuthenticatedUser>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: IdentityId,
    pub email: String,
    pub name: String,
    pub role: String,
    /// Session the token belongs to
    pub session_id: Uuid,
    /// Token ID
    pub jti: String,
}

impl TryFrom<Claims> for AuthenticatedUser {
    type Error = JwtError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let user_id: IdentityId = claims.sub.parse().map_err(|_| JwtError::InvalidToken)?;
        let session_id = Uuid::parse_str(&claims.sid).map_err(|_| JwtError::InvalidToken)?;

        Ok(Self {
            user_id,
            email: claims.email,
            name: claims.name,
            role: claims.role,
            session_id,
            jti: claims.jti,
        })
    }
}

/// Authentication middleware errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No token provided")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] JwtError),

    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("Store error: {0}")]
    Store(#[from] AgendaError),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AuthError::MissingToken => (
                StatusCode::UNAUTHORIZED,
                ApiError::new("No token provided"),
            ),
            AuthError::TokenRevoked => (
                StatusCode::UNAUTHORIZED,
                ApiError::new("Token has been revoked"),
            ),
            AuthError::InvalidToken(_) => (StatusCode::FORBIDDEN, ApiError::new("Invalid token")),
            AuthError::Store(err) => {
                tracing::error!(error = %err, "Store failure during authentication");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::new("Internal server error").with_error(err.to_string()),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Pull the raw token out of the Authorization header
///
/// The value is used as-is; a leading `Bearer ` is stripped when present.
fn extract_token(request: &Request<Body>) -> Option<&str> {
    let value = request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .trim();
    let token = match value.strip_prefix("Bearer") {
        Some(rest) if rest.is_empty() || rest.starts_with(' ') => rest.trim(),
        _ => value,
    };
    (!token.is_empty()).then_some(token)
}

/// Authentication middleware that requires a valid access token
///
/// Checks, in order:
/// 1. a token is present
/// 2. its hash is not in the revocation log
/// 3. signature, issuer and expiry
/// 4. the session it names exists and is not revoked
///
/// Revocation state is read from the store on every request.
///
/// # Usage
///
/// ```ignore
/// let protected = Router::new()
///     .route("/calendar", get(list_calendars))
///     .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let ip_address = extract_ip_address(request.headers());
    let user_agent = extract_user_agent(request.headers());

    // Owned so the request is not borrowed across store calls
    let token = extract_token(&request)
        .ok_or(AuthError::MissingToken)?
        .to_string();

    if state.store.is_token_revoked(&hash_token(&token)).await? {
        audit_log(&AuditEvent::InvalidToken {
            reason: "Token has been revoked".to_string(),
            ip_address,
            user_agent,
        });
        return Err(AuthError::TokenRevoked);
    }

    let user = match verify_access_token(&state.config.auth, &token)
        .and_then(AuthenticatedUser::try_from)
    {
        Ok(user) => user,
        Err(e) => {
            audit_log(&AuditEvent::InvalidToken {
                reason: e.to_string(),
                ip_address,
                user_agent,
            });
            return Err(AuthError::InvalidToken(e));
        }
    };

    let session_active = state
        .store
        .get_session(user.session_id)
        .await?
        .is_some_and(|session| !session.is_revoked() && session.identity_id == user.user_id);
    if !session_active {
        audit_log(&AuditEvent::InvalidToken {
            reason: format!("Session {} revoked or missing", user.session_id),
            ip_address,
            user_agent,
        });
        return Err(AuthError::TokenRevoked);
    }

    tracing::debug!(user_id = %user.user_id, session_id = %user.session_id, "Authenticated request");
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agenda_core::Identity;

    #[test]
    fn test_claims_conversion() {
        let identity = Identity::new("a@example.com", "hash".to_string(), "A");
        let session_id = Uuid::new_v4();
        let claims = Claims {
            iss: "agenda-api".to_string(),
            sub: identity.id.to_string(),
            sid: session_id.to_string(),
            jti: "jti".to_string(),
            iat: 0,
            exp: 0,
            email: identity.email.clone(),
            name: identity.name.clone(),
            role: "user".to_string(),
        };

        let user = AuthenticatedUser::try_from(claims.clone()).unwrap();
        assert_eq!(user.user_id, identity.id);
        assert_eq!(user.session_id, session_id);
        assert_eq!(user.role, "user");

        let bad = Claims {
            sid: "not-a-uuid".to_string(),
            ..claims
        };
        assert!(AuthenticatedUser::try_from(bad).is_err());
    }

    #[test]
    fn test_extract_token_tolerates_bearer_prefix() {
        let bare = Request::builder()
            .header(header::AUTHORIZATION, "abc.def.ghi")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_token(&bare), Some("abc.def.ghi"));

        let bearer = Request::builder()
            .header(header::AUTHORIZATION, "Bearer abc.def.ghi")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_token(&bearer), Some("abc.def.ghi"));

        let empty = Request::builder()
            .header(header::AUTHORIZATION, "Bearer ")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_token(&empty), None);

        let missing = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(extract_token(&missing), None);
    }

    #[tokio::test]
    async fn test_error_status_codes() {
        assert_eq!(
            AuthError::MissingToken.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::TokenRevoked.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::InvalidToken(JwtError::ExpiredToken)
                .into_response()
                .status(),
            StatusCode::FORBIDDEN
        );
    }
}
