//! Authentication and authorization module
//!
//! - Token issuing and verification (access + refresh JWTs, token hashing)
//! - Credential validation and Argon2 password hashing
//! - Middleware guarding protected routes
//! - Authentication service for sessions and identity lookups

pub mod jwt;
pub mod middleware;
pub mod password;
pub mod service;

pub use jwt::{hash_token, issue_access_token, issue_refresh_token, verify_access_token, Claims};
pub use middleware::{auth_middleware, AuthError, AuthenticatedUser};
pub use password::{hash_password, validate_credentials, verify_password, PasswordConfig};
pub use service::{
    AuthResponse, AuthService, LoginRequest, RefreshRequest, RefreshResponse, RegisterRequest,
    UserListResponse,
};
