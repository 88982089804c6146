//! Security audit logging for authentication events
//!
//! Every event is logged at INFO level with the "audit" target so it can be
//! filtered and routed separately from request logs.
//!
//! # Example
//!
//! ```ignore
//! use agenda_api::audit::{audit_log, AuditEvent};
//!
//! audit_log(&AuditEvent::LoginSuccess {
//!     user_id: identity.id,
//!     email: identity.email.clone(),
//!     session_id,
//!     ip_address: None,
//!     user_agent: None,
//! });
//! ```

use agenda_core::IdentityId;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Security audit events for authentication and authorization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Credentials accepted and a session opened
    LoginSuccess {
        user_id: IdentityId,
        email: String,
        session_id: Uuid,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Credentials rejected
    LoginFailure {
        email: String,
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Refresh token revoked
    Logout {
        user_id: Option<IdentityId>,
        session_id: Option<Uuid>,
        ip_address: Option<String>,
    },

    /// New access token minted from a refresh token
    TokenRefresh {
        user_id: IdentityId,
        session_id: Uuid,
        ip_address: Option<String>,
    },

    /// Refresh token rejected
    TokenRefreshFailure {
        reason: String,
        ip_address: Option<String>,
    },

    RegistrationSuccess {
        user_id: IdentityId,
        email: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    RegistrationFailure {
        email: String,
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Bearer token failed verification or was revoked
    InvalidToken {
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Authenticated caller touched a resource they do not own
    AccessDenied {
        user_id: IdentityId,
        resource: String,
        action: String,
    },
}

/// Write an audit event to the "audit" tracing target
///
/// The full event is attached as a JSON string alongside a few indexed
/// fields, e.g.
///
/// ```json
/// {"event_type":"login_success","user_id":"...","email":"user@example.com", ...}
/// ```
pub fn audit_log(event: &AuditEvent) {
    let timestamp = Utc::now();

    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    match event {
        AuditEvent::LoginSuccess {
            user_id,
            email,
            session_id,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                email = %email,
                session_id = %session_id,
                ip_address = ?ip_address,
                "Login successful"
            );
        }
        AuditEvent::LoginFailure {
            email,
            reason,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                email = %email,
                reason = %reason,
                ip_address = ?ip_address,
                "Login failed"
            );
        }
        AuditEvent::Logout {
            user_id,
            session_id,
            ip_address,
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = ?user_id,
                session_id = ?session_id,
                ip_address = ?ip_address,
                "User logged out"
            );
        }
        AuditEvent::TokenRefresh {
            user_id,
            session_id,
            ip_address,
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                session_id = %session_id,
                ip_address = ?ip_address,
                "Access token refreshed"
            );
        }
        AuditEvent::TokenRefreshFailure { reason, ip_address } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                reason = %reason,
                ip_address = ?ip_address,
                "Token refresh rejected"
            );
        }
        AuditEvent::RegistrationSuccess {
            user_id,
            email,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                email = %email,
                ip_address = ?ip_address,
                "User registered"
            );
        }
        AuditEvent::RegistrationFailure {
            email,
            reason,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                email = %email,
                reason = %reason,
                ip_address = ?ip_address,
                "Registration failed"
            );
        }
        AuditEvent::InvalidToken {
            reason,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                reason = %reason,
                ip_address = ?ip_address,
                "Invalid token presented"
            );
        }
        AuditEvent::AccessDenied {
            user_id,
            resource,
            action,
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                resource = %resource,
                action = %action,
                "Access denied"
            );
        }
    }
}

/// Request context attached to audit events
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        Self {
            ip_address: extract_ip_address(headers),
            user_agent: extract_user_agent(headers),
        }
    }
}

/// Client IP from proxy headers, if any
///
/// `X-Forwarded-For` wins over `X-Real-IP`; only the first hop is kept.
pub fn extract_ip_address(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(first_ip) = headers
        .get("x-forwarded-for")
        .and_then(|xff| xff.to_str().ok())
        .and_then(|xff| xff.split(',').next())
    {
        return Some(first_ip.trim().to_string());
    }

    headers
        .get("x-real-ip")
        .and_then(|ip| ip.to_str().ok())
        .map(|ip| ip.to_string())
}

pub fn extract_user_agent(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::LoginSuccess {
            user_id: IdentityId::new(),
            email: "test@example.com".to_string(),
            session_id: Uuid::new_v4(),
            ip_address: Some("192.168.1.1".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"login_success\""));
        assert!(json.contains("test@example.com"));
    }

    #[test]
    fn test_audit_log_every_variant() {
        let user_id = IdentityId::new();
        let session_id = Uuid::new_v4();
        let ip = Some("192.168.1.1".to_string());

        let events = vec![
            AuditEvent::LoginFailure {
                email: "test@example.com".to_string(),
                reason: "Invalid password".to_string(),
                ip_address: ip.clone(),
                user_agent: None,
            },
            AuditEvent::Logout {
                user_id: Some(user_id),
                session_id: Some(session_id),
                ip_address: ip.clone(),
            },
            AuditEvent::TokenRefresh {
                user_id,
                session_id,
                ip_address: None,
            },
            AuditEvent::TokenRefreshFailure {
                reason: "revoked".to_string(),
                ip_address: None,
            },
            AuditEvent::RegistrationSuccess {
                user_id,
                email: "new@example.com".to_string(),
                ip_address: None,
                user_agent: None,
            },
            AuditEvent::RegistrationFailure {
                email: "new@example.com".to_string(),
                reason: "User already registered".to_string(),
                ip_address: None,
                user_agent: None,
            },
            AuditEvent::InvalidToken {
                reason: "expired".to_string(),
                ip_address: None,
                user_agent: None,
            },
            AuditEvent::AccessDenied {
                user_id,
                resource: format!("calendar:{}", Uuid::new_v4()),
                action: "delete_event".to_string(),
            },
        ];

        for event in &events {
            audit_log(event);
        }
    }

    #[test]
    fn test_extract_ip_from_x_forwarded_for() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.1, 198.51.100.1".parse().unwrap(),
        );
        headers.insert("x-real-ip", "10.0.0.1".parse().unwrap());

        assert_eq!(extract_ip_address(&headers), Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_extract_ip_from_x_real_ip() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-real-ip", "203.0.113.1".parse().unwrap());

        assert_eq!(extract_ip_address(&headers), Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_client_info_from_headers() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-real-ip", "203.0.113.7".parse().unwrap());
        headers.insert(
            axum::http::header::USER_AGENT,
            "agenda-cli/1.0".parse().unwrap(),
        );

        let client = ClientInfo::from_headers(&headers);
        assert_eq!(client.ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(client.user_agent.as_deref(), Some("agenda-cli/1.0"));
    }

    #[test]
    fn test_extract_missing_headers() {
        let headers = axum::http::HeaderMap::new();

        assert_eq!(extract_ip_address(&headers), None);
        assert_eq!(extract_user_agent(&headers), None);
    }
}
