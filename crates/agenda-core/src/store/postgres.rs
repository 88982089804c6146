//! PostgreSQL store
//!
//! Calendars keep their ordered event references in a `UUID[]` column.
//! Multi-record mutations run inside a transaction.

use super::AgendaStore;
use crate::{
    normalize_email, AgendaError, Calendar, Event, Identity, IdentityId, Result, RevocationRecord,
    Role, Session,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use uuid::Uuid;

/// Schema bootstrap, applied by [`PgStore::migrate`]
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS identities (
        id UUID PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        name TEXT NOT NULL,
        role TEXT NOT NULL DEFAULT 'user',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id UUID PRIMARY KEY,
        identity_id UUID NOT NULL REFERENCES identities(id),
        token_hash TEXT NOT NULL UNIQUE,
        expires_at TIMESTAMPTZ NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        revoked_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS token_revocations (
        token_hash TEXT PRIMARY KEY,
        expires_at TIMESTAMPTZ NOT NULL,
        revoked_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS calendars (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        owner_id UUID NOT NULL REFERENCES identities(id),
        event_ids UUID[] NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id UUID PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT,
        start_time TIMESTAMPTZ NOT NULL,
        end_time TIMESTAMPTZ NOT NULL,
        location TEXT,
        organizer_id UUID NOT NULL REFERENCES identities(id),
        attendee_ids UUID[] NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS calendars_owner_idx ON calendars (owner_id, created_at)",
    "CREATE INDEX IF NOT EXISTS events_organizer_start_idx ON events (organizer_id, start_time)",
    "CREATE INDEX IF NOT EXISTS token_revocations_expires_idx ON token_revocations (expires_at)",
];

const IDENTITY_COLUMNS: &str = "id, email, password_hash, name, role, created_at, updated_at";
const SESSION_COLUMNS: &str = "id, identity_id, token_hash, expires_at, created_at, revoked_at";
const CALENDAR_COLUMNS: &str = "id, name, owner_id, event_ids, created_at, updated_at";
const EVENT_COLUMNS: &str = "id, title, description, start_time, end_time, location, organizer_id, attendee_ids, created_at, updated_at";

/// PostgreSQL-backed store
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new store connection
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| AgendaError::DatabaseError(format!("PostgreSQL connection failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Create tables and indexes if they do not exist
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("apply schema", e))?;
        }
        tracing::info!("Database schema is up to date");
        Ok(())
    }
}

fn db_error(action: &str, err: sqlx::Error) -> AgendaError {
    AgendaError::DatabaseError(format!("Failed to {action}: {err}"))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .is_some_and(|code| code == "23505")
}

fn to_uuids(ids: &[IdentityId]) -> Vec<Uuid> {
    ids.iter().map(IdentityId::as_uuid).collect()
}

// ============================================================================
// Row types
// ============================================================================

#[derive(Debug, FromRow)]
struct IdentityRow {
    id: Uuid,
    email: String,
    password_hash: String,
    name: String,
    role: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<IdentityRow> for Identity {
    fn from(row: IdentityRow) -> Self {
        Identity {
            id: row.id.into(),
            email: row.email,
            password_hash: row.password_hash,
            name: row.name,
            role: row.role.parse().unwrap_or(Role::User),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct SessionRow {
    id: Uuid,
    identity_id: Uuid,
    token_hash: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: row.id,
            identity_id: row.identity_id.into(),
            token_hash: row.token_hash,
            expires_at: row.expires_at,
            created_at: row.created_at,
            revoked_at: row.revoked_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct CalendarRow {
    id: Uuid,
    name: String,
    owner_id: Uuid,
    event_ids: Vec<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CalendarRow> for Calendar {
    fn from(row: CalendarRow) -> Self {
        Calendar {
            id: row.id,
            name: row.name,
            owner: row.owner_id.into(),
            events: row.event_ids,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct EventRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    location: Option<String>,
    organizer_id: Uuid,
    attendee_ids: Vec<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Event {
            id: row.id,
            title: row.title,
            description: row.description,
            start_time: row.start_time,
            end_time: row.end_time,
            location: row.location,
            organizer: row.organizer_id.into(),
            attendees: row.attendee_ids.into_iter().map(IdentityId::from).collect(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

// ============================================================================
// AgendaStore implementation
// ============================================================================

#[async_trait]
impl AgendaStore for PgStore {
    async fn create_identity(&self, identity: &Identity) -> Result<()> {
        let email = normalize_email(&identity.email);

        sqlx::query(
            r#"
            INSERT INTO identities (id, email, password_hash, name, role, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(identity.id.as_uuid())
        .bind(&email)
        .bind(&identity.password_hash)
        .bind(&identity.name)
        .bind(identity.role.as_str())
        .bind(identity.created_at)
        .bind(identity.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AgendaError::Conflict(format!("Email already registered: {email}"))
            } else {
                db_error("create identity", e)
            }
        })?;

        Ok(())
    }

    async fn get_identity(&self, id: IdentityId) -> Result<Option<Identity>> {
        let row: Option<IdentityRow> =
            sqlx::query_as(&format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("fetch identity", e))?;

        Ok(row.map(Identity::from))
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>> {
        let row: Option<IdentityRow> = sqlx::query_as(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities WHERE email = $1"
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("fetch identity", e))?;

        Ok(row.map(Identity::from))
    }

    async fn get_identities(&self, ids: &[IdentityId]) -> Result<Vec<Identity>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<IdentityRow> = sqlx::query_as(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities WHERE id = ANY($1)"
        ))
        .bind(to_uuids(ids))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("fetch identities", e))?;

        Ok(rows.into_iter().map(Identity::from).collect())
    }

    async fn list_identities(&self, limit: i64, offset: i64) -> Result<Vec<Identity>> {
        let rows: Vec<IdentityRow> = sqlx::query_as(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities ORDER BY created_at, id LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list identities", e))?;

        Ok(rows.into_iter().map(Identity::from).collect())
    }

    async fn count_identities(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM identities")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("count identities", e))
    }

    async fn create_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, identity_id, token_hash, expires_at, created_at, revoked_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(session.id)
        .bind(session.identity_id.as_uuid())
        .bind(&session.token_hash)
        .bind(session.expires_at)
        .bind(session.created_at)
        .bind(session.revoked_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("create session", e))?;

        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        let row: Option<SessionRow> =
            sqlx::query_as(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("fetch session", e))?;

        Ok(row.map(Session::from))
    }

    async fn find_session_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("fetch session", e))?;

        Ok(row.map(Session::from))
    }

    async fn revoke_session(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result =
            sqlx::query("UPDATE sessions SET revoked_at = COALESCE(revoked_at, $2) WHERE id = $1")
                .bind(id)
                .bind(at)
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("revoke session", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_revocation(&self, record: &RevocationRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO token_revocations (token_hash, expires_at, revoked_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (token_hash) DO NOTHING
            "#,
        )
        .bind(&record.token_hash)
        .bind(record.expires_at)
        .bind(record.revoked_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("record revocation", e))?;

        Ok(())
    }

    async fn is_token_revoked(&self, token_hash: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM token_revocations WHERE token_hash = $1 AND expires_at > NOW()",
        )
        .bind(token_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("check revocation log", e))?;

        Ok(count > 0)
    }

    async fn purge_expired_revocations(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM token_revocations WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("purge revocation log", e))?;

        Ok(result.rows_affected())
    }

    async fn create_calendar(&self, calendar: &Calendar) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO calendars (id, name, owner_id, event_ids, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(calendar.id)
        .bind(&calendar.name)
        .bind(calendar.owner.as_uuid())
        .bind(&calendar.events)
        .bind(calendar.created_at)
        .bind(calendar.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("create calendar", e))?;

        Ok(())
    }

    async fn get_calendar(&self, id: Uuid) -> Result<Option<Calendar>> {
        let row: Option<CalendarRow> =
            sqlx::query_as(&format!("SELECT {CALENDAR_COLUMNS} FROM calendars WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("fetch calendar", e))?;

        Ok(row.map(Calendar::from))
    }

    async fn list_calendars_by_owner(&self, owner: IdentityId) -> Result<Vec<Calendar>> {
        let rows: Vec<CalendarRow> = sqlx::query_as(&format!(
            "SELECT {CALENDAR_COLUMNS} FROM calendars WHERE owner_id = $1 ORDER BY created_at, id"
        ))
        .bind(owner.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list calendars", e))?;

        Ok(rows.into_iter().map(Calendar::from).collect())
    }

    async fn rename_calendar(
        &self,
        id: Uuid,
        owner: IdentityId,
        name: &str,
    ) -> Result<Option<Calendar>> {
        let row: Option<CalendarRow> = sqlx::query_as(&format!(
            r#"
            UPDATE calendars SET name = $3, updated_at = NOW()
            WHERE id = $1 AND owner_id = $2
            RETURNING {CALENDAR_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner.as_uuid())
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("rename calendar", e))?;

        Ok(row.map(Calendar::from))
    }

    async fn delete_calendar(&self, id: Uuid, owner: IdentityId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM calendars WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete calendar", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_event_in_calendar(&self, calendar_id: Uuid, event: &Event) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO events (
                id, title, description, start_time, end_time, location,
                organizer_id, attendee_ids, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.id)
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.start_time)
        .bind(event.end_time)
        .bind(&event.location)
        .bind(event.organizer.as_uuid())
        .bind(to_uuids(&event.attendees))
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("create event", e))?;

        let linked = sqlx::query(
            "UPDATE calendars SET event_ids = array_append(event_ids, $2), updated_at = NOW() WHERE id = $1",
        )
        .bind(calendar_id)
        .bind(event.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("link event to calendar", e))?;

        if linked.rows_affected() == 0 {
            // Dropping the transaction rolls back the event insert.
            return Err(AgendaError::NotFound(format!("Calendar {calendar_id}")));
        }

        tx.commit()
            .await
            .map_err(|e| db_error("commit transaction", e))?;
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>> {
        let row: Option<EventRow> =
            sqlx::query_as(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("fetch event", e))?;

        Ok(row.map(Event::from))
    }

    async fn get_events(&self, ids: &[Uuid]) -> Result<Vec<Event>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<EventRow> =
            sqlx::query_as(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ANY($1)"))
                .bind(ids)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db_error("fetch events", e))?;

        let mut events: Vec<Event> = rows.into_iter().map(Event::from).collect();
        events.sort_by_key(|e| ids.iter().position(|id| *id == e.id));
        Ok(events)
    }

    async fn update_event(&self, event: &Event) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE events SET
                title = $2,
                description = $3,
                start_time = $4,
                end_time = $5,
                location = $6,
                attendee_ids = $7,
                updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(event.id)
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.start_time)
        .bind(event.end_time)
        .bind(&event.location)
        .bind(to_uuids(&event.attendees))
        .bind(event.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("update event", e))?;

        if result.rows_affected() == 0 {
            return Err(AgendaError::NotFound(format!("Event {}", event.id)));
        }
        Ok(())
    }

    async fn delete_event_from_calendar(&self, calendar_id: Uuid, event_id: Uuid) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;

        let detached = sqlx::query(
            r#"
            UPDATE calendars SET event_ids = array_remove(event_ids, $2), updated_at = NOW()
            WHERE id = $1 AND $2 = ANY(event_ids)
            "#,
        )
        .bind(calendar_id)
        .bind(event_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("detach event", e))?;

        if detached.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(event_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("delete event", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("commit transaction", e))?;
        Ok(true)
    }

    async fn list_events_by_organizer_between(
        &self,
        organizer: IdentityId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM events
            WHERE organizer_id = $1 AND start_time >= $2 AND start_time < $3
            ORDER BY start_time, created_at
            "#
        ))
        .bind(organizer.as_uuid())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list events by day", e))?;

        Ok(rows.into_iter().map(Event::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn connect() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let store = PgStore::connect(&url, 2).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[test]
    fn test_event_row_conversion() {
        let organizer = Uuid::new_v4();
        let attendee = Uuid::new_v4();
        let now = Utc::now();
        let row = EventRow {
            id: Uuid::new_v4(),
            title: "Standup".to_string(),
            description: None,
            start_time: now,
            end_time: now + Duration::minutes(15),
            location: Some("Room 1".to_string()),
            organizer_id: organizer,
            attendee_ids: vec![attendee],
            created_at: now,
            updated_at: now,
        };

        let event = Event::from(row);
        assert_eq!(event.organizer.as_uuid(), organizer);
        assert_eq!(event.attendees, vec![IdentityId::from(attendee)]);
    }

    #[test]
    fn test_identity_row_unknown_role_falls_back() {
        let now = Utc::now();
        let row = IdentityRow {
            id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            password_hash: "h".to_string(),
            name: "A".to_string(),
            role: "superuser".to_string(),
            created_at: now,
            updated_at: now,
        };

        assert_eq!(Identity::from(row).role, Role::User);
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn test_event_lifecycle_in_transaction() {
        let store = connect().await;
        let owner = Identity::new(
            &format!("{}@example.com", Uuid::new_v4()),
            "hash".to_string(),
            "Owner",
        );
        store.create_identity(&owner).await.unwrap();

        let calendar = Calendar::new("Work", owner.id);
        store.create_calendar(&calendar).await.unwrap();

        let start = Utc::now();
        let event = Event::new("Standup", start, start + Duration::minutes(15), owner.id);
        store
            .create_event_in_calendar(calendar.id, &event)
            .await
            .unwrap();
        assert_eq!(
            store.get_calendar(calendar.id).await.unwrap().unwrap().events,
            vec![event.id]
        );

        let missing = store
            .create_event_in_calendar(Uuid::new_v4(), &Event::new("X", start, start, owner.id))
            .await;
        assert!(matches!(missing, Err(AgendaError::NotFound(_))));

        assert!(store
            .delete_event_from_calendar(calendar.id, event.id)
            .await
            .unwrap());
        assert!(store.get_event(event.id).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn test_duplicate_email_is_conflict() {
        let store = connect().await;
        let email = format!("{}@example.com", Uuid::new_v4());
        store
            .create_identity(&Identity::new(&email, "h".to_string(), "A"))
            .await
            .unwrap();

        let result = store
            .create_identity(&Identity::new(&email.to_uppercase(), "h".to_string(), "B"))
            .await;
        assert!(matches!(result, Err(AgendaError::Conflict(_))));
    }
}
