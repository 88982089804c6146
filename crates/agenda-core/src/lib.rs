//! Agenda Core - Domain models, configuration and storage
//!
//! This crate defines the core abstractions used by the Agenda API:
//! - Identity, session and revocation records
//! - Calendars and events
//! - Common error types
//! - The `AgendaStore` persistence trait (in-memory and PostgreSQL)
//! - Configuration management

pub mod config;
pub mod store;
pub mod time;

pub use config::{AppConfig, AuthConfig, ConfigError, DatabaseConfig, LoggingConfig, ServerConfig};
pub use store::{AgendaStore, MemoryStore, PgStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for Agenda operations
#[derive(Error, Debug)]
pub enum AgendaError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AgendaError>;

// ============================================================================
// Identities
// ============================================================================

/// Identifier of a registered identity
///
/// Used for every role an identity can play: calendar owner, event
/// organizer, attendee and session holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(Uuid);

impl IdentityId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for IdentityId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for IdentityId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for IdentityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for IdentityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Role carried in tokens and identity summaries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = AgendaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(AgendaError::ValidationError(format!("Unknown role: {other}"))),
        }
    }
}

/// Registered user account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: IdentityId,

    /// Login email, stored normalized (see [`normalize_email`])
    pub email: String,

    /// Argon2id PHC string; never serialized
    #[serde(skip_serializing, default)]
    pub password_hash: String,

    pub name: String,

    pub role: Role,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Identity {
    /// Create a new identity with the default role
    pub fn new(email: &str, password_hash: String, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: IdentityId::new(),
            email: normalize_email(email),
            password_hash,
            name: name.into(),
            role: Role::User,
            created_at: now,
            updated_at: now,
        }
    }

    /// Public representation with sensitive fields stripped
    pub fn to_summary(&self) -> IdentitySummary {
        IdentitySummary {
            id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
            role: self.role,
        }
    }
}

/// Identity fields safe to return from the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySummary {
    pub id: IdentityId,
    pub email: String,
    pub name: String,
    pub role: Role,
}

/// Emails are compared case-insensitively and without surrounding whitespace.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// ============================================================================
// Sessions and Revocation
// ============================================================================

/// One authenticated login of an identity
///
/// Each session is bound to exactly one refresh token, stored as a SHA-256
/// hash. An identity may hold several sessions at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub identity_id: IdentityId,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        id: Uuid,
        identity_id: IdentityId,
        token_hash: String,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            identity_id,
            token_hash,
            expires_at,
            created_at: Utc::now(),
            revoked_at: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Not expired and not revoked
    pub fn is_active(&self) -> bool {
        !self.is_expired() && !self.is_revoked()
    }
}

/// Append-only record of a logged-out refresh token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationRecord {
    pub token_hash: String,

    /// Expiry of the revoked token; the record is meaningless afterwards
    pub expires_at: DateTime<Utc>,

    pub revoked_at: DateTime<Utc>,
}

impl RevocationRecord {
    pub fn new(token_hash: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            token_hash,
            expires_at,
            revoked_at: Utc::now(),
        }
    }
}

// ============================================================================
// Calendars and Events
// ============================================================================

/// A named, owned, ordered collection of event references
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Calendar {
    pub id: Uuid,
    pub name: String,
    pub owner: IdentityId,
    pub events: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Calendar {
    pub fn new(name: impl Into<String>, owner: IdentityId) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            owner,
            events: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, identity: IdentityId) -> bool {
        self.owner == identity
    }

    pub fn contains_event(&self, event_id: Uuid) -> bool {
        self.events.contains(&event_id)
    }
}

/// A scheduled item with a time range, organizer and attendees
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub location: Option<String>,
    pub organizer: IdentityId,
    pub attendees: Vec<IdentityId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn new(
        title: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        organizer: IdentityId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: None,
            start_time,
            end_time,
            location: None,
            organizer,
            attendees: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    pub fn with_attendees(mut self, attendees: Vec<IdentityId>) -> Self {
        self.attendees = dedup_attendees(attendees);
        self
    }

    pub fn is_organized_by(&self, identity: IdentityId) -> bool {
        self.organizer == identity
    }

    /// Check the time range invariant
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(AgendaError::ValidationError(
                "Event title is required".to_string(),
            ));
        }
        if self.end_time < self.start_time {
            return Err(AgendaError::ValidationError(
                "End time must be after start time".to_string(),
            ));
        }
        Ok(())
    }

    /// Merge an allow-listed set of changes into this event
    pub fn apply(&mut self, patch: EventPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(start_time) = patch.start_time {
            self.start_time = start_time;
        }
        if let Some(end_time) = patch.end_time {
            self.end_time = end_time;
        }
        if let Some(location) = patch.location {
            self.location = location;
        }
        if let Some(attendees) = patch.attendees {
            self.attendees = dedup_attendees(attendees);
        }
        self.updated_at = Utc::now();
    }

    /// Expand identity references using the provided lookup
    ///
    /// Attendees missing from `identities` are skipped.
    pub fn to_detail(&self, identities: &[Identity]) -> Option<EventDetail> {
        let find = |id: IdentityId| identities.iter().find(|i| i.id == id);

        let organizer = find(self.organizer)?.to_summary();
        let attendees = self
            .attendees
            .iter()
            .filter_map(|id| find(*id).map(Identity::to_summary))
            .collect();

        Some(EventDetail {
            id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            location: self.location.clone(),
            organizer,
            attendees,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    /// Every identity referenced by this event, organizer first
    pub fn participants(&self) -> Vec<IdentityId> {
        let mut ids = vec![self.organizer];
        ids.extend(self.attendees.iter().copied().filter(|id| *id != self.organizer));
        ids
    }
}

/// Attendees form a set; keep the first occurrence of each id.
fn dedup_attendees(attendees: Vec<IdentityId>) -> Vec<IdentityId> {
    let mut seen = std::collections::HashSet::new();
    attendees.into_iter().filter(|id| seen.insert(*id)).collect()
}

/// Updatable event fields
///
/// Anything outside this list is rejected at deserialization time. The
/// optional text fields are cleared by an explicit `null`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EventPatch {
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default, deserialize_with = "deserialize_nullable")]
    pub description: Option<Option<String>>,

    #[serde(default, deserialize_with = "time::deserialize_optional_timestamp")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "time::deserialize_optional_timestamp")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "deserialize_nullable")]
    pub location: Option<Option<String>>,

    #[serde(default)]
    pub attendees: Option<Vec<IdentityId>>,
}

/// Present fields become `Some`, so `null` reads as `Some(None)`
fn deserialize_nullable<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Event with organizer and attendees expanded to identity summaries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetail {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub location: Option<String>,
    pub organizer: IdentitySummary,
    pub attendees: Vec<IdentitySummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Tests
// ============================================================================
