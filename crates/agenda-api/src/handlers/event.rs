//! Event handlers
//!
//! Events live in a calendar's event list. Creating and deleting require
//! ownership of that calendar; updating requires being the organizer.

use super::auth::MessageResponse;
use super::calendar::parse_id;
use crate::audit::{audit_log, AuditEvent};
use crate::auth::AuthenticatedUser;
use crate::error::{ApiJson, AppError};
use crate::state::AppState;
use agenda_core::{
    time, AgendaError, AgendaStore, Calendar, Event, EventDetail, EventPatch, IdentityId,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Body of `POST /event/:calendarId/events`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub attendees: Option<Vec<String>>,
}

impl CreateEventRequest {
    /// Build the event for `organizer`, checking required fields and times
    fn into_event(self, organizer: IdentityId) -> Result<Event, AppError> {
        let (title, start, end) = match (
            self.title.filter(|t| !t.trim().is_empty()),
            self.start_time,
            self.end_time,
        ) {
            (Some(title), Some(start), Some(end)) => (title, start, end),
            _ => {
                return Err(AppError::BadRequest(
                    "Title, start time and end time are required".to_string(),
                ))
            }
        };

        let start_time = time::parse_timestamp(&start)
            .ok_or_else(|| AppError::BadRequest(format!("Invalid start time: {start}")))?;
        let end_time = time::parse_timestamp(&end)
            .ok_or_else(|| AppError::BadRequest(format!("Invalid end time: {end}")))?;

        let attendees = self
            .attendees
            .unwrap_or_default()
            .iter()
            .map(|raw| raw.parse::<IdentityId>().map_err(|_| attendee_not_found()))
            .collect::<Result<Vec<_>, _>>()?;

        let event = Event::new(title.trim(), start_time, end_time, organizer)
            .with_description(self.description)
            .with_location(self.location)
            .with_attendees(attendees);
        event.validate()?;

        Ok(event)
    }
}

fn calendar_not_found() -> AppError {
    AppError::NotFound("Calendar not found".to_string())
}

fn event_not_found() -> AppError {
    AppError::NotFound("Event not found".to_string())
}

fn event_not_in_calendar() -> AppError {
    AppError::NotFound("Event not found in this calendar".to_string())
}

fn attendee_not_found() -> AppError {
    AppError::BadRequest("Attendee not found".to_string())
}

/// Load a calendar and require the caller to own it
async fn owned_calendar(
    store: &dyn AgendaStore,
    raw_id: &str,
    user: &AuthenticatedUser,
    action: &str,
    denied: &str,
) -> Result<Calendar, AppError> {
    let calendar_id = parse_id(raw_id, calendar_not_found)?;
    let calendar = store
        .get_calendar(calendar_id)
        .await?
        .ok_or_else(calendar_not_found)?;

    if !calendar.is_owned_by(user.user_id) {
        audit_log(&AuditEvent::AccessDenied {
            user_id: user.user_id,
            resource: format!("calendar:{calendar_id}"),
            action: action.to_string(),
        });
        return Err(AppError::Forbidden(denied.to_string()));
    }

    Ok(calendar)
}

/// Every attendee must name a registered identity
async fn ensure_attendees_exist(store: &dyn AgendaStore, event: &Event) -> Result<(), AppError> {
    if event.attendees.is_empty() {
        return Ok(());
    }
    let found = store.get_identities(&event.attendees).await?;
    let known: HashSet<IdentityId> = found.iter().map(|identity| identity.id).collect();
    if event.attendees.iter().all(|id| known.contains(id)) {
        Ok(())
    } else {
        Err(attendee_not_found())
    }
}

/// Expand organizers and attendees with one identity lookup
async fn expand(store: &dyn AgendaStore, events: &[Event]) -> Result<Vec<EventDetail>, AppError> {
    let mut ids: Vec<IdentityId> = events.iter().flat_map(Event::participants).collect();
    ids.sort();
    ids.dedup();

    let identities = store.get_identities(&ids).await?;

    Ok(events
        .iter()
        .filter_map(|event| {
            let detail = event.to_detail(&identities);
            if detail.is_none() {
                tracing::warn!(event_id = %event.id, organizer = %event.organizer, "Organizer missing, skipping event");
            }
            detail
        })
        .collect())
}

async fn expand_one(store: &dyn AgendaStore, event: &Event) -> Result<EventDetail, AppError> {
    expand(store, std::slice::from_ref(event))
        .await?
        .pop()
        .ok_or_else(|| AppError::Internal(format!("Organizer of event {} not found", event.id)))
}

/// Create an event in one of the caller's calendars
///
/// # Responses
///
/// * `201 Created` - event stored and appended to the calendar
/// * `400 Bad Request` - missing fields, bad times or unknown attendee
/// * `403 Forbidden` - calendar belongs to someone else
/// * `404 Not Found` - no such calendar
pub async fn create_event(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(calendar_id): Path<String>,
    ApiJson(request): ApiJson<CreateEventRequest>,
) -> Result<impl IntoResponse, AppError> {
    let store = state.store.as_ref();
    let calendar = owned_calendar(
        store,
        &calendar_id,
        &user,
        "create_event",
        "Not authorized to add events to this calendar",
    )
    .await?;

    let event = request.into_event(user.user_id)?;
    ensure_attendees_exist(store, &event).await?;

    match store.create_event_in_calendar(calendar.id, &event).await {
        Ok(()) => {}
        Err(AgendaError::NotFound(_)) => return Err(calendar_not_found()),
        Err(e) => return Err(e.into()),
    }

    tracing::info!(event_id = %event.id, calendar_id = %calendar.id, "Event created");
    Ok((StatusCode::CREATED, Json(expand_one(store, &event).await?)))
}

/// Events of one of the caller's calendars, in calendar order
pub async fn list_calendar_events(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(calendar_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let store = state.store.as_ref();
    let calendar = owned_calendar(
        store,
        &calendar_id,
        &user,
        "list_events",
        "Not authorized to view events of this calendar",
    )
    .await?;

    let events = store.get_events(&calendar.events).await?;
    Ok(Json(expand(store, &events).await?))
}

/// Fetch one event by id
///
/// Open to any authenticated caller.
pub async fn get_event(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let store = state.store.as_ref();
    let event_id = parse_id(&event_id, event_not_found)?;
    let event = store
        .get_event(event_id)
        .await?
        .ok_or_else(event_not_found)?;

    Ok(Json(expand_one(store, &event).await?))
}

/// Partial update, organizer only
///
/// Fields outside the allow-list reject the whole request.
pub async fn update_event(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(event_id): Path<String>,
    ApiJson(patch): ApiJson<EventPatch>,
) -> Result<impl IntoResponse, AppError> {
    let store = state.store.as_ref();
    let event_id = parse_id(&event_id, event_not_found)?;
    let mut event = store
        .get_event(event_id)
        .await?
        .ok_or_else(event_not_found)?;

    if !event.is_organized_by(user.user_id) {
        audit_log(&AuditEvent::AccessDenied {
            user_id: user.user_id,
            resource: format!("event:{event_id}"),
            action: "update_event".to_string(),
        });
        return Err(AppError::Forbidden(
            "Only the organizer can update this event".to_string(),
        ));
    }

    let attendees_changed = patch.attendees.is_some();
    event.apply(patch);
    event.validate()?;
    if attendees_changed {
        ensure_attendees_exist(store, &event).await?;
    }

    match store.update_event(&event).await {
        Ok(()) => {}
        Err(AgendaError::NotFound(_)) => return Err(event_not_found()),
        Err(e) => return Err(e.into()),
    }

    Ok(Json(expand_one(store, &event).await?))
}

/// Remove an event from one of the caller's calendars
pub async fn delete_event(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((calendar_id, event_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let store = state.store.as_ref();
    let calendar = owned_calendar(
        store,
        &calendar_id,
        &user,
        "delete_event",
        "Not authorized to delete events from this calendar",
    )
    .await?;

    let event_id = parse_id(&event_id, event_not_in_calendar)?;
    if !store
        .delete_event_from_calendar(calendar.id, event_id)
        .await?
    {
        return Err(event_not_in_calendar());
    }

    tracing::info!(event_id = %event_id, calendar_id = %calendar.id, "Event deleted");
    Ok(Json(MessageResponse::new("Event deleted successfully")))
}

/// Events the caller organizes that start on a local calendar day
pub async fn events_for_day(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(date): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let store = state.store.as_ref();
    let day = time::parse_day(&date).ok_or_else(|| {
        AppError::BadRequest("Invalid date format, expected YYYY-MM-DD".to_string())
    })?;

    let (from, to) = time::local_day_bounds(day);
    let events = store
        .list_events_by_organizer_between(user.user_id, from, to)
        .await?;
    if events.is_empty() {
        return Err(AppError::NotFound("No events found for this date".to_string()));
    }

    Ok(Json(expand(store, &events).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CreateEventRequest {
        CreateEventRequest {
            title: Some("Standup".to_string()),
            start_time: Some("2024-03-01T09:00:00Z".to_string()),
            end_time: Some("2024-03-01T09:15:00Z".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_into_event() {
        let organizer = IdentityId::new();
        let attendee = IdentityId::new();
        let event = CreateEventRequest {
            attendees: Some(vec![attendee.to_string(), attendee.to_string()]),
            location: Some("Room 1".to_string()),
            ..request()
        }
        .into_event(organizer)
        .unwrap();

        assert_eq!(event.title, "Standup");
        assert_eq!(event.organizer, organizer);
        assert_eq!(event.attendees, vec![attendee]);
        assert_eq!(event.location.as_deref(), Some("Room 1"));
    }

    #[test]
    fn test_missing_fields() {
        let err = CreateEventRequest {
            end_time: None,
            ..request()
        }
        .into_event(IdentityId::new())
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_end_before_start() {
        let err = CreateEventRequest {
            end_time: Some("2024-03-01T08:00:00Z".to_string()),
            ..request()
        }
        .into_event(IdentityId::new())
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "End time must be after start time"));
    }

    #[test]
    fn test_malformed_attendee() {
        let err = CreateEventRequest {
            attendees: Some(vec!["nope".to_string()]),
            ..request()
        }
        .into_event(IdentityId::new())
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "Attendee not found"));
    }

    #[test]
    fn test_request_field_names() {
        let request: CreateEventRequest = serde_json::from_value(serde_json::json!({
            "title": "Review",
            "startTime": "2024-03-01T10:00:00Z",
            "endTime": "2024-03-01T11:00:00Z",
        }))
        .unwrap();
        assert_eq!(request.start_time.as_deref(), Some("2024-03-01T10:00:00Z"));
        assert!(request.attendees.is_none());
    }
}
