//! Persistence layer
//!
//! `AgendaStore` is the single seam between the API and storage. Two
//! implementations are provided:
//! - [`MemoryStore`]: process-local tables behind one `RwLock`, used for
//!   development and tests
//! - [`PgStore`]: PostgreSQL via SQLx
//!
//! Operations that touch two records (event + calendar list) are atomic in
//! both implementations.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::{Calendar, Event, Identity, IdentityId, Result, RevocationRecord, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Storage operations required by the API
#[async_trait]
pub trait AgendaStore: Send + Sync {
    // ------------------------------------------------------------------
    // Identities
    // ------------------------------------------------------------------

    /// Persist a new identity; fails with `Conflict` on a duplicate email
    async fn create_identity(&self, identity: &Identity) -> Result<()>;

    async fn get_identity(&self, id: IdentityId) -> Result<Option<Identity>>;

    /// Look up by normalized email
    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>>;

    /// Fetch several identities; unknown ids are skipped
    async fn get_identities(&self, ids: &[IdentityId]) -> Result<Vec<Identity>>;

    /// Page through identities in creation order
    async fn list_identities(&self, limit: i64, offset: i64) -> Result<Vec<Identity>>;

    async fn count_identities(&self) -> Result<i64>;

    // ------------------------------------------------------------------
    // Sessions and revocation
    // ------------------------------------------------------------------

    async fn create_session(&self, session: &Session) -> Result<()>;

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>>;

    async fn find_session_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>>;

    /// Flag a session revoked; returns false if it does not exist
    async fn revoke_session(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// Append to the revocation log; recording the same token twice is a no-op
    async fn record_revocation(&self, record: &RevocationRecord) -> Result<()>;

    /// True while an unexpired revocation record exists for the hash
    async fn is_token_revoked(&self, token_hash: &str) -> Result<bool>;

    /// Drop revocation records whose token expired at or before `now`
    async fn purge_expired_revocations(&self, now: DateTime<Utc>) -> Result<u64>;

    // ------------------------------------------------------------------
    // Calendars
    // ------------------------------------------------------------------

    async fn create_calendar(&self, calendar: &Calendar) -> Result<()>;

    async fn get_calendar(&self, id: Uuid) -> Result<Option<Calendar>>;

    /// Calendars owned by `owner`, in creation order
    async fn list_calendars_by_owner(&self, owner: IdentityId) -> Result<Vec<Calendar>>;

    /// Rename a calendar only if `owner` owns it
    async fn rename_calendar(
        &self,
        id: Uuid,
        owner: IdentityId,
        name: &str,
    ) -> Result<Option<Calendar>>;

    /// Delete a calendar only if `owner` owns it
    async fn delete_calendar(&self, id: Uuid, owner: IdentityId) -> Result<bool>;

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Insert an event and append it to the calendar's event list atomically
    ///
    /// Fails with `NotFound` (and persists nothing) if the calendar is gone.
    async fn create_event_in_calendar(&self, calendar_id: Uuid, event: &Event) -> Result<()>;

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>>;

    /// Fetch events preserving the order of `ids`; unknown ids are skipped
    async fn get_events(&self, ids: &[Uuid]) -> Result<Vec<Event>>;

    /// Replace the stored event
    async fn update_event(&self, event: &Event) -> Result<()>;

    /// Detach an event from a calendar and delete it atomically
    ///
    /// Returns false, touching nothing, if the calendar does not list the event.
    async fn delete_event_from_calendar(&self, calendar_id: Uuid, event_id: Uuid) -> Result<bool>;

    /// Events organized by `organizer` starting in `[from, to)`, by start time
    async fn list_events_by_organizer_between(
        &self,
        organizer: IdentityId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>>;
}
