//! Agenda Configuration Management
//!
//! Handles configuration from environment variables and TOML files
//! with sensible defaults for development.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEV_ACCESS_SECRET: &str = "development-access-secret-change-in-production";
const DEV_REFRESH_SECRET: &str = "development-refresh-secret-change-in-production";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database connection
    pub database: DatabaseConfig,

    /// Token signing and lifetimes
    pub auth: AuthConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        Self::from_toml_str(&content).map_err(|message| ConfigError::ParseError { path, message })
    }

    fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Overlay environment variables on top of this configuration
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env()?;
        Ok(self)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Server
        if let Ok(host) = std::env::var("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_env("API_PORT")? {
            self.server.port = port;
        }
        if let Ok(prefix) = std::env::var("API_PREFIX") {
            self.server.api_prefix = prefix;
        }

        // Database
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = Some(url).filter(|u| !u.is_empty());
        }
        if let Some(size) = parse_env("DATABASE_POOL_SIZE")? {
            self.database.pool_size = size;
        }

        // Auth
        if let Ok(secret) = std::env::var("ACCESS_TOKEN_SECRET") {
            self.auth.access_secret = secret;
        }
        if let Ok(secret) = std::env::var("REFRESH_TOKEN_SECRET") {
            self.auth.refresh_secret = secret;
        }
        if let Some(ttl) = parse_env("ACCESS_TOKEN_TTL_SECS")? {
            self.auth.access_ttl_secs = ttl;
        }
        if let Some(ttl) = parse_env("REFRESH_TOKEN_TTL_SECS")? {
            self.auth.refresh_ttl_secs = ttl;
        }
        if let Ok(issuer) = std::env::var("JWT_ISSUER") {
            self.auth.issuer = issuer;
        }
        if let Some(memory) = parse_env("PASSWORD_HASH_MEMORY_KIB")? {
            self.auth.hash_memory_kib = memory;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.logging.json_format = format.eq_ignore_ascii_case("json");
        }

        Ok(())
    }

    /// Reject configurations that cannot work
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.access_secret.is_empty() {
            return Err(ConfigError::MissingRequired("ACCESS_TOKEN_SECRET".to_string()));
        }
        if self.auth.refresh_secret.is_empty() {
            return Err(ConfigError::MissingRequired("REFRESH_TOKEN_SECRET".to_string()));
        }
        if self.auth.access_secret == self.auth.refresh_secret {
            return Err(ConfigError::InvalidValue {
                key: "REFRESH_TOKEN_SECRET".to_string(),
                value: "<must differ from ACCESS_TOKEN_SECRET>".to_string(),
            });
        }
        if !self.server.api_prefix.is_empty() && !self.server.api_prefix.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                key: "API_PREFIX".to_string(),
                value: self.server.api_prefix.clone(),
            });
        }
        Ok(())
    }

    /// True when the built-in development secrets are still in use
    pub fn uses_development_secrets(&self) -> bool {
        self.auth.access_secret == DEV_ACCESS_SECRET
            || self.auth.refresh_secret == DEV_REFRESH_SECRET
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Prefix for every API route (e.g. "/api")
    pub api_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            api_prefix: "/api".to_string(),
        }
    }
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; the in-memory store is used when unset
    pub url: Option<String>,

    /// PostgreSQL connection pool size
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: 10,
        }
    }
}

/// Token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for access tokens
    pub access_secret: String,

    /// HMAC secret for refresh tokens (must differ from the access secret)
    pub refresh_secret: String,

    /// Access token lifetime (default: 7 days)
    pub access_ttl_secs: u64,

    /// Refresh token lifetime (default: 30 days)
    pub refresh_ttl_secs: u64,

    /// Token issuer identifier
    pub issuer: String,

    /// Argon2 memory cost in KiB (default: 64 MiB)
    pub hash_memory_kib: u32,

    /// Argon2 iterations
    pub hash_iterations: u32,

    /// Argon2 lanes
    pub hash_parallelism: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_secret: DEV_ACCESS_SECRET.to_string(),
            refresh_secret: DEV_REFRESH_SECRET.to_string(),
            access_ttl_secs: 7 * 24 * 3600,
            refresh_ttl_secs: 30 * 24 * 3600,
            issuer: "agenda-api".to_string(),
            hash_memory_kib: 65536,
            hash_iterations: 3,
            hash_parallelism: 4,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
