//! Authentication service layer
//!
//! Business logic for registration, login, token refresh, logout and
//! identity lookups. Persistence goes through [`AgendaStore`]; every login
//! opens its own session so several devices can stay signed in at once.

use super::jwt::{hash_token, issue_access_token, issue_refresh_token, verify_refresh_token};
use super::password::{hash_password, validate_credentials, verify_password, PasswordConfig};
use crate::audit::{audit_log, AuditEvent, ClientInfo};
use crate::error::AppError;
use crate::state::AppState;
use agenda_core::{
    normalize_email, AgendaError, AgendaStore, AuthConfig, Identity, IdentityId,
    IdentitySummary, RevocationRecord, Session,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 100;

/// User registration request
///
/// Fields are optional so a missing one is reported with the API's own
/// message rather than a body rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// User login request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Body of refresh and logout requests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Token pair returned by register and login
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub message: String,
    pub access_token: String,
    pub refresh_token: String,
    pub user: IdentitySummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
}

/// One page of identities
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserListResponse {
    pub users: Vec<IdentitySummary>,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn AgendaStore>,
    auth: AuthConfig,
    password: PasswordConfig,
}

impl AuthService {
    pub fn new(store: Arc<dyn AgendaStore>, auth: AuthConfig, password: PasswordConfig) -> Self {
        Self {
            store,
            auth,
            password,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.store.clone(),
            state.config.auth.clone(),
            state.password.clone(),
        )
    }

    /// Register a new identity and sign it in
    ///
    /// A duplicate email is reported before password rules are checked.
    pub async fn register(
        &self,
        request: RegisterRequest,
        client: &ClientInfo,
    ) -> Result<AuthResponse, AppError> {
        let (email, password, name) = match (
            non_empty(request.email),
            non_empty(request.password),
            non_empty(request.name),
        ) {
            (Some(email), Some(password), Some(name)) => (email, password, name),
            _ => {
                return Err(AppError::BadRequest(
                    "Email, password and name are required".to_string(),
                ))
            }
        };

        let reject = |reason: String| {
            audit_log(&AuditEvent::RegistrationFailure {
                email: email.clone(),
                reason: reason.clone(),
                ip_address: client.ip_address.clone(),
                user_agent: client.user_agent.clone(),
            });
            AppError::BadRequest(reason)
        };

        if self
            .store
            .find_identity_by_email(&normalize_email(&email))
            .await?
            .is_some()
        {
            return Err(reject("User already registered".to_string()));
        }

        validate_credentials(email.trim(), &password).map_err(reject)?;

        let password_hash = self.hash(password).await?;
        let identity = Identity::new(&email, password_hash, name.trim());

        match self.store.create_identity(&identity).await {
            Ok(()) => {}
            // Lost a race with a concurrent registration
            Err(AgendaError::Conflict(_)) => {
                return Err(reject("User already registered".to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let (access_token, refresh_token, _) = self.open_session(&identity).await?;

        audit_log(&AuditEvent::RegistrationSuccess {
            user_id: identity.id,
            email: identity.email.clone(),
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
        });

        Ok(AuthResponse {
            message: "User registered successfully".to_string(),
            access_token,
            refresh_token,
            user: identity.to_summary(),
        })
    }

    /// Check credentials and open a new session
    pub async fn login(
        &self,
        request: LoginRequest,
        client: &ClientInfo,
    ) -> Result<AuthResponse, AppError> {
        let (email, password) = match (non_empty(request.email), non_empty(request.password)) {
            (Some(email), Some(password)) => (email, password),
            _ => {
                return Err(AppError::BadRequest(
                    "Email and password are required".to_string(),
                ))
            }
        };

        let reject = |reason: &str| {
            audit_log(&AuditEvent::LoginFailure {
                email: email.clone(),
                reason: reason.to_string(),
                ip_address: client.ip_address.clone(),
                user_agent: client.user_agent.clone(),
            });
            AppError::BadRequest(reason.to_string())
        };

        let Some(identity) = self
            .store
            .find_identity_by_email(&normalize_email(&email))
            .await?
        else {
            return Err(reject("User not found"));
        };

        if !self.verify(password, identity.password_hash.clone()).await? {
            return Err(reject("Invalid password"));
        }

        let (access_token, refresh_token, session_id) = self.open_session(&identity).await?;

        audit_log(&AuditEvent::LoginSuccess {
            user_id: identity.id,
            email: identity.email.clone(),
            session_id,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
        });

        Ok(AuthResponse {
            message: "Login successful".to_string(),
            access_token,
            refresh_token,
            user: identity.to_summary(),
        })
    }

    /// Exchange a refresh token for a new access token on the same session
    pub async fn refresh(
        &self,
        request: RefreshRequest,
        client: &ClientInfo,
    ) -> Result<RefreshResponse, AppError> {
        let token = non_empty(request.refresh_token)
            .ok_or_else(|| AppError::BadRequest("Refresh token is required".to_string()))?;

        let reject = |reason: String| {
            audit_log(&AuditEvent::TokenRefreshFailure {
                reason,
                ip_address: client.ip_address.clone(),
            });
            AppError::Forbidden("Invalid refresh token".to_string())
        };

        let token_hash = hash_token(&token);
        if self.store.is_token_revoked(&token_hash).await? {
            return Err(reject("token revoked".to_string()));
        }

        let claims = verify_refresh_token(&self.auth, &token).map_err(|e| reject(e.to_string()))?;

        let session = match self.store.find_session_by_token_hash(&token_hash).await? {
            Some(session) if session.is_active() => session,
            Some(_) => return Err(reject("session revoked or expired".to_string())),
            None => return Err(reject("unknown session".to_string())),
        };
        if claims.sub != session.identity_id.to_string() {
            return Err(reject("subject does not match session".to_string()));
        }

        let identity = self
            .store
            .get_identity(session.identity_id)
            .await?
            .ok_or_else(|| reject("identity no longer exists".to_string()))?;

        let access_token = issue_access_token(&self.auth, &identity, session.id)?;

        audit_log(&AuditEvent::TokenRefresh {
            user_id: identity.id,
            session_id: session.id,
            ip_address: client.ip_address.clone(),
        });

        Ok(RefreshResponse { access_token })
    }

    /// Revoke a refresh token and the session it belongs to
    ///
    /// Unknown or already revoked tokens are accepted silently. Only tokens
    /// that name a session or still verify reach the revocation log.
    pub async fn logout(&self, request: RefreshRequest, client: &ClientInfo) -> Result<(), AppError> {
        let token = non_empty(request.refresh_token)
            .ok_or_else(|| AppError::BadRequest("Refresh token is required".to_string()))?;

        let token_hash = hash_token(&token);
        let session = self.store.find_session_by_token_hash(&token_hash).await?;

        let expires_at = match &session {
            Some(session) => Some(session.expires_at),
            None => verify_refresh_token(&self.auth, &token)
                .ok()
                .and_then(|claims| Utc.timestamp_opt(claims.exp as i64, 0).single()),
        };

        let now = Utc::now();
        if let Some(expires_at) = expires_at.filter(|at| *at > now) {
            let purged = self.store.purge_expired_revocations(now).await?;
            if purged > 0 {
                tracing::debug!(purged, "Dropped expired revocation records");
            }
            self.store
                .record_revocation(&RevocationRecord::new(token_hash, expires_at))
                .await?;
        }

        if let Some(session) = &session {
            self.store.revoke_session(session.id, Utc::now()).await?;
        }

        audit_log(&AuditEvent::Logout {
            user_id: session.as_ref().map(|s| s.identity_id),
            session_id: session.as_ref().map(|s| s.id),
            ip_address: client.ip_address.clone(),
        });

        Ok(())
    }

    /// Page through registered identities
    ///
    /// `page` starts at 1; `limit` is clamped to `1..=100`.
    pub async fn list_users(
        &self,
        page: Option<i64>,
        limit: Option<i64>,
    ) -> Result<UserListResponse, AppError> {
        let page = page.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1).saturating_mul(limit);

        let users = self
            .store
            .list_identities(limit, offset)
            .await?
            .iter()
            .map(Identity::to_summary)
            .collect();
        let total = self.store.count_identities().await?;

        Ok(UserListResponse {
            users,
            page,
            limit,
            total,
            total_pages: (total + limit - 1) / limit,
        })
    }

    pub async fn find_by_email(&self, email: Option<String>) -> Result<IdentitySummary, AppError> {
        let email = non_empty(email).ok_or_else(|| {
            AppError::BadRequest("Email query parameter is required".to_string())
        })?;

        self.store
            .find_identity_by_email(&normalize_email(&email))
            .await?
            .map(|identity| identity.to_summary())
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    pub async fn get_user(&self, id: IdentityId) -> Result<IdentitySummary, AppError> {
        self.store
            .get_identity(id)
            .await?
            .map(|identity| identity.to_summary())
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    /// Create a session and the token pair bound to it
    async fn open_session(&self, identity: &Identity) -> Result<(String, String, Uuid), AppError> {
        let session_id = Uuid::new_v4();
        let refresh_token = issue_refresh_token(&self.auth, identity, session_id)?;
        let access_token = issue_access_token(&self.auth, identity, session_id)?;

        let session = Session::new(
            session_id,
            identity.id,
            hash_token(&refresh_token),
            self.refresh_expiry(),
        );
        self.store.create_session(&session).await?;

        tracing::debug!(user_id = %identity.id, session_id = %session_id, "Session opened");
        Ok((access_token, refresh_token, session_id))
    }

    fn refresh_expiry(&self) -> DateTime<Utc> {
        Utc::now() + Duration::seconds(self.auth.refresh_ttl_secs as i64)
    }

    // Argon2 is CPU bound; keep it off the async workers.
    async fn hash(&self, password: String) -> Result<String, AppError> {
        let config = self.password.clone();
        tokio::task::spawn_blocking(move || hash_password(&password, &config))
            .await
            .map_err(|e| AppError::Internal(format!("Password hashing task failed: {e}")))?
            .map_err(AppError::from)
    }

    async fn verify(&self, password: String, hash: String) -> Result<bool, AppError> {
        tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| AppError::Internal(format!("Password verification task failed: {e}")))?
            .map_err(AppError::from)
    }
}

/// Treat blank strings the same as absent ones
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agenda_core::MemoryStore;

    fn service() -> AuthService {
        let password = PasswordConfig {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
            output_len: Some(32),
        };
        AuthService::new(Arc::new(MemoryStore::new()), AuthConfig::default(), password)
    }

    fn register_request(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            email: Some(email.to_string()),
            password: Some(password.to_string()),
            name: Some("Test User".to_string()),
        }
    }

    fn message(err: AppError) -> String {
        match err {
            AppError::BadRequest(m)
            | AppError::Forbidden(m)
            | AppError::NotFound(m)
            | AppError::Unauthorized(m) => m,
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_register_normalizes_email() {
        let service = service();
        let client = ClientInfo::default();

        let response = service
            .register(register_request("  Alice@Example.COM ", "SecureP@ss1"), &client)
            .await
            .unwrap();

        assert_eq!(response.user.email, "alice@example.com");
        assert_eq!(response.message, "User registered successfully");
        assert_ne!(response.access_token, response.refresh_token);
    }

    #[tokio::test]
    async fn test_duplicate_checked_before_password_rules() {
        let service = service();
        let client = ClientInfo::default();

        service
            .register(register_request("bob@example.com", "SecureP@ss1"), &client)
            .await
            .unwrap();

        let err = service
            .register(register_request("BOB@example.com", "weak"), &client)
            .await
            .unwrap_err();
        assert_eq!(message(err), "User already registered");
    }

    #[tokio::test]
    async fn test_register_requires_all_fields() {
        let service = service();
        let request = RegisterRequest {
            name: Some("   ".to_string()),
            ..register_request("c@example.com", "SecureP@ss1")
        };

        let err = service
            .register(request, &ClientInfo::default())
            .await
            .unwrap_err();
        assert_eq!(message(err), "Email, password and name are required");
    }

    #[tokio::test]
    async fn test_login_failures_are_distinct() {
        let service = service();
        let client = ClientInfo::default();
        service
            .register(register_request("dan@example.com", "SecureP@ss1"), &client)
            .await
            .unwrap();

        let unknown = service
            .login(
                LoginRequest {
                    email: Some("nobody@example.com".to_string()),
                    password: Some("SecureP@ss1".to_string()),
                },
                &client,
            )
            .await
            .unwrap_err();
        assert_eq!(message(unknown), "User not found");

        let wrong = service
            .login(
                LoginRequest {
                    email: Some("dan@example.com".to_string()),
                    password: Some("WrongP@ss1".to_string()),
                },
                &client,
            )
            .await
            .unwrap_err();
        assert_eq!(message(wrong), "Invalid password");
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let service = service();
        let client = ClientInfo::default();
        let first = service
            .register(register_request("eve@example.com", "SecureP@ss1"), &client)
            .await
            .unwrap();
        let second = service
            .login(
                LoginRequest {
                    email: Some("eve@example.com".to_string()),
                    password: Some("SecureP@ss1".to_string()),
                },
                &client,
            )
            .await
            .unwrap();

        service
            .logout(
                RefreshRequest {
                    refresh_token: Some(second.refresh_token.clone()),
                },
                &client,
            )
            .await
            .unwrap();

        // The first session survives the second one's logout
        assert!(service
            .refresh(
                RefreshRequest {
                    refresh_token: Some(first.refresh_token),
                },
                &client,
            )
            .await
            .is_ok());

        let err = service
            .refresh(
                RefreshRequest {
                    refresh_token: Some(second.refresh_token),
                },
                &client,
            )
            .await
            .unwrap_err();
        assert_eq!(message(err), "Invalid refresh token");
    }

    #[tokio::test]
    async fn test_logout_unknown_token_succeeds() {
        let service = service();
        let client = ClientInfo::default();

        let request = RefreshRequest {
            refresh_token: Some("garbage".to_string()),
        };
        service.logout(request.clone(), &client).await.unwrap();
        service.logout(request, &client).await.unwrap();

        let err = service
            .logout(RefreshRequest::default(), &client)
            .await
            .unwrap_err();
        assert_eq!(message(err), "Refresh token is required");
    }

    #[tokio::test]
    async fn test_logout_with_junk_token_leaves_log_untouched() {
        let service = service();
        let client = ClientInfo::default();

        for i in 0..3 {
            let junk = format!("junk-{i}");
            service
                .logout(
                    RefreshRequest {
                        refresh_token: Some(junk.clone()),
                    },
                    &client,
                )
                .await
                .unwrap();
            assert!(!service
                .store
                .is_token_revoked(&hash_token(&junk))
                .await
                .unwrap());
        }
    }

    #[tokio::test]
    async fn test_logout_records_issued_token() {
        let service = service();
        let client = ClientInfo::default();
        let registered = service
            .register(register_request("fay@example.com", "SecureP@ss1"), &client)
            .await
            .unwrap();

        service
            .logout(
                RefreshRequest {
                    refresh_token: Some(registered.refresh_token.clone()),
                },
                &client,
            )
            .await
            .unwrap();

        assert!(service
            .store
            .is_token_revoked(&hash_token(&registered.refresh_token))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_access_token_rejected_as_refresh_token() {
        let service = service();
        let client = ClientInfo::default();
        let registered = service
            .register(register_request("fay@example.com", "SecureP@ss1"), &client)
            .await
            .unwrap();

        let err = service
            .refresh(
                RefreshRequest {
                    refresh_token: Some(registered.access_token),
                },
                &client,
            )
            .await
            .unwrap_err();
        assert_eq!(message(err), "Invalid refresh token");
    }

    #[tokio::test]
    async fn test_list_users_pagination() {
        let service = service();
        let client = ClientInfo::default();
        for i in 0..3 {
            service
                .register(
                    register_request(&format!("user{i}@example.com"), "SecureP@ss1"),
                    &client,
                )
                .await
                .unwrap();
        }

        let page = service.list_users(Some(2), Some(2)).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.users.len(), 1);
        assert_eq!(page.users[0].email, "user2@example.com");

        let clamped = service.list_users(Some(0), Some(1000)).await.unwrap();
        assert_eq!(clamped.page, 1);
        assert_eq!(clamped.limit, 100);
        assert_eq!(clamped.users.len(), 3);
    }

    #[tokio::test]
    async fn test_find_by_email() {
        let service = service();
        service
            .register(
                register_request("gus@example.com", "SecureP@ss1"),
                &ClientInfo::default(),
            )
            .await
            .unwrap();

        let found = service
            .find_by_email(Some("GUS@example.com".to_string()))
            .await
            .unwrap();
        assert_eq!(found.name, "Test User");

        assert_eq!(
            message(service.find_by_email(None).await.unwrap_err()),
            "Email query parameter is required"
        );
        assert_eq!(
            message(
                service
                    .find_by_email(Some("missing@example.com".to_string()))
                    .await
                    .unwrap_err()
            ),
            "User not found"
        );
    }
}
