//! In-memory store
//!
//! All tables live behind a single `tokio::sync::RwLock`, so every write,
//! including the two-record event operations, is serialized.

use super::AgendaStore;
use crate::{
    normalize_email, AgendaError, Calendar, Event, Identity, IdentityId, Result, RevocationRecord,
    Session,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Row plus insertion sequence, used to keep listings in creation order
#[derive(Debug, Clone)]
struct Row<T> {
    seq: u64,
    value: T,
}

#[derive(Debug, Default)]
struct Tables {
    next_seq: u64,
    identities: HashMap<IdentityId, Row<Identity>>,
    sessions: HashMap<Uuid, Session>,
    revocations: HashMap<String, RevocationRecord>,
    calendars: HashMap<Uuid, Row<Calendar>>,
    events: HashMap<Uuid, Event>,
}

impl Tables {
    fn row<T>(&mut self, value: T) -> Row<T> {
        self.next_seq += 1;
        Row {
            seq: self.next_seq,
            value,
        }
    }
}

/// Process-local store for development and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgendaStore for MemoryStore {
    async fn create_identity(&self, identity: &Identity) -> Result<()> {
        let mut tables = self.tables.write().await;

        let email = normalize_email(&identity.email);
        if tables
            .identities
            .values()
            .any(|row| row.value.email == email)
        {
            return Err(AgendaError::Conflict(format!(
                "Email already registered: {email}"
            )));
        }

        let mut identity = identity.clone();
        identity.email = email;
        let row = tables.row(identity);
        tables.identities.insert(row.value.id, row);
        Ok(())
    }

    async fn get_identity(&self, id: IdentityId) -> Result<Option<Identity>> {
        let tables = self.tables.read().await;
        Ok(tables.identities.get(&id).map(|row| row.value.clone()))
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>> {
        let email = normalize_email(email);
        let tables = self.tables.read().await;
        Ok(tables
            .identities
            .values()
            .find(|row| row.value.email == email)
            .map(|row| row.value.clone()))
    }

    async fn get_identities(&self, ids: &[IdentityId]) -> Result<Vec<Identity>> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.identities.get(id))
            .map(|row| row.value.clone())
            .collect())
    }

    async fn list_identities(&self, limit: i64, offset: i64) -> Result<Vec<Identity>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<&Row<Identity>> = tables.identities.values().collect();
        rows.sort_by_key(|row| row.seq);

        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|row| row.value.clone())
            .collect())
    }

    async fn count_identities(&self) -> Result<i64> {
        Ok(self.tables.read().await.identities.len() as i64)
    }

    async fn create_session(&self, session: &Session) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.tables.read().await.sessions.get(&id).cloned())
    }

    async fn find_session_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .values()
            .find(|s| s.token_hash == token_hash)
            .cloned())
    }

    async fn revoke_session(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.sessions.get_mut(&id) {
            Some(session) => {
                session.revoked_at.get_or_insert(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_revocation(&self, record: &RevocationRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .revocations
            .entry(record.token_hash.clone())
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn is_token_revoked(&self, token_hash: &str) -> Result<bool> {
        let now = Utc::now();
        Ok(self
            .tables
            .read()
            .await
            .revocations
            .get(token_hash)
            .is_some_and(|record| record.expires_at > now))
    }

    async fn purge_expired_revocations(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.revocations.len();
        tables.revocations.retain(|_, record| record.expires_at > now);
        Ok((before - tables.revocations.len()) as u64)
    }

    async fn create_calendar(&self, calendar: &Calendar) -> Result<()> {
        let mut tables = self.tables.write().await;
        let row = tables.row(calendar.clone());
        tables.calendars.insert(calendar.id, row);
        Ok(())
    }

    async fn get_calendar(&self, id: Uuid) -> Result<Option<Calendar>> {
        let tables = self.tables.read().await;
        Ok(tables.calendars.get(&id).map(|row| row.value.clone()))
    }

    async fn list_calendars_by_owner(&self, owner: IdentityId) -> Result<Vec<Calendar>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<&Row<Calendar>> = tables
            .calendars
            .values()
            .filter(|row| row.value.is_owned_by(owner))
            .collect();
        rows.sort_by_key(|row| row.seq);

        Ok(rows.into_iter().map(|row| row.value.clone()).collect())
    }

    async fn rename_calendar(
        &self,
        id: Uuid,
        owner: IdentityId,
        name: &str,
    ) -> Result<Option<Calendar>> {
        let mut tables = self.tables.write().await;
        match tables.calendars.get_mut(&id) {
            Some(row) if row.value.is_owned_by(owner) => {
                row.value.name = name.to_string();
                row.value.updated_at = Utc::now();
                Ok(Some(row.value.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_calendar(&self, id: Uuid, owner: IdentityId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let owned = tables
            .calendars
            .get(&id)
            .is_some_and(|row| row.value.is_owned_by(owner));
        if owned {
            tables.calendars.remove(&id);
        }
        Ok(owned)
    }

    async fn create_event_in_calendar(&self, calendar_id: Uuid, event: &Event) -> Result<()> {
        let mut tables = self.tables.write().await;

        let calendar = tables
            .calendars
            .get_mut(&calendar_id)
            .ok_or_else(|| AgendaError::NotFound(format!("Calendar {calendar_id}")))?;
        calendar.value.events.push(event.id);
        calendar.value.updated_at = Utc::now();

        tables.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>> {
        Ok(self.tables.read().await.events.get(&id).cloned())
    }

    async fn get_events(&self, ids: &[Uuid]) -> Result<Vec<Event>> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.events.get(id).cloned())
            .collect())
    }

    async fn update_event(&self, event: &Event) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.events.get_mut(&event.id) {
            Some(stored) => {
                *stored = event.clone();
                Ok(())
            }
            None => Err(AgendaError::NotFound(format!("Event {}", event.id))),
        }
    }

    async fn delete_event_from_calendar(&self, calendar_id: Uuid, event_id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;

        let Some(calendar) = tables.calendars.get_mut(&calendar_id) else {
            return Ok(false);
        };
        if !calendar.value.contains_event(event_id) {
            return Ok(false);
        }
        calendar.value.events.retain(|id| *id != event_id);
        calendar.value.updated_at = Utc::now();

        tables.events.remove(&event_id);
        Ok(true)
    }

    async fn list_events_by_organizer_between(
        &self,
        organizer: IdentityId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        let tables = self.tables.read().await;
        let mut events: Vec<Event> = tables
            .events
            .values()
            .filter(|e| e.is_organized_by(organizer) && e.start_time >= from && e.start_time < to)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.start_time, e.created_at));
        Ok(events)
    }
}
