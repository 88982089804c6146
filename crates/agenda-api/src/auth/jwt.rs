//! JWT token generation and validation
//!
//! Access and refresh tokens are both HS256 JWTs carrying the same claims,
//! signed with distinct secrets so one can never be replayed as the other.
//! Every token names the session it belongs to (`sid`).

use agenda_core::{AuthConfig, Identity};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// JWT Claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Token issuer
    pub iss: String,
    /// Subject - identity ID
    pub sub: String,
    /// Session the token was issued for
    pub sid: String,
    /// Unique token identifier
    pub jti: String,
    /// Issued at (Unix epoch seconds)
    pub iat: u64,
    /// Expiration (Unix epoch seconds)
    pub exp: u64,
    pub email: String,
    pub name: String,
    pub role: String,
}

/// JWT token generation and validation errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to encode JWT: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),

    #[error("Invalid token format")]
    InvalidToken,

    #[error("Token has expired")]
    ExpiredToken,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("System time error: {0}")]
    SystemTimeError(#[from] std::time::SystemTimeError),
}

/// Signing parameters for one kind of token
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_secs: u64,
    pub issuer: String,
}

impl JwtConfig {
    /// Parameters for access tokens
    pub fn access(auth: &AuthConfig) -> Self {
        Self {
            secret: auth.access_secret.clone(),
            expiration_secs: auth.access_ttl_secs,
            issuer: auth.issuer.clone(),
        }
    }

    /// Parameters for refresh tokens
    pub fn refresh(auth: &AuthConfig) -> Self {
        Self {
            secret: auth.refresh_secret.clone(),
            expiration_secs: auth.refresh_ttl_secs,
            issuer: auth.issuer.clone(),
        }
    }
}

/// Issue an access token for `identity` bound to `session_id`
pub fn issue_access_token(
    auth: &AuthConfig,
    identity: &Identity,
    session_id: Uuid,
) -> Result<String, JwtError> {
    generate_token(&JwtConfig::access(auth), identity, session_id)
}

/// Issue a refresh token for `identity` bound to `session_id`
pub fn issue_refresh_token(
    auth: &AuthConfig,
    identity: &Identity,
    session_id: Uuid,
) -> Result<String, JwtError> {
    generate_token(&JwtConfig::refresh(auth), identity, session_id)
}

pub fn verify_access_token(auth: &AuthConfig, token: &str) -> Result<Claims, JwtError> {
    validate_token(&JwtConfig::access(auth), token)
}

pub fn verify_refresh_token(auth: &AuthConfig, token: &str) -> Result<Claims, JwtError> {
    validate_token(&JwtConfig::refresh(auth), token)
}

/// Sign a token with the given parameters
///
/// A fresh `jti` makes every token distinct, so two tokens issued within
/// the same second never share a hash.
pub fn generate_token(
    config: &JwtConfig,
    identity: &Identity,
    session_id: Uuid,
) -> Result<String, JwtError> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

    let claims = Claims {
        iss: config.issuer.clone(),
        sub: identity.id.to_string(),
        sid: session_id.to_string(),
        jti: Uuid::new_v4().to_string(),
        iat: now,
        exp: now + config.expiration_secs,
        email: identity.email.clone(),
        name: identity.name.clone(),
        role: identity.role.to_string(),
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )?;

    Ok(token)
}

/// Check signature, issuer and expiry, returning the claims
pub fn validate_token(config: &JwtConfig, token: &str) -> Result<Claims, JwtError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[&config.issuer]);
    validation.leeway = 0;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::ExpiredToken,
        jsonwebtoken::errors::ErrorKind::InvalidSignature => JwtError::InvalidSignature,
        _ => JwtError::InvalidToken,
    })?;

    Ok(token_data.claims)
}

/// SHA-256 of a token, hex encoded
///
/// Only hashes are persisted in sessions and the revocation log.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
