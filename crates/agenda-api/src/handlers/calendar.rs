//! Calendar handlers
//!
//! Every operation is scoped to the caller: a calendar owned by someone
//! else is reported exactly like a missing one.

use super::auth::MessageResponse;
use crate::auth::AuthenticatedUser;
use crate::error::{ApiJson, AppError};
use crate::state::AppState;
use agenda_core::Calendar;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Body of create and rename
#[derive(Debug, Default, Deserialize)]
pub struct CalendarRequest {
    #[serde(default)]
    pub name: Option<String>,
}

impl CalendarRequest {
    fn into_name(self) -> Result<String, AppError> {
        self.name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AppError::BadRequest("Calendar name is required".to_string()))
    }
}

fn calendar_not_found() -> AppError {
    AppError::NotFound("Calendar not found".to_string())
}

/// Path ids that are not UUIDs cannot name anything
pub(crate) fn parse_id(raw: &str, not_found: fn() -> AppError) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| not_found())
}

pub async fn create_calendar(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    ApiJson(request): ApiJson<CalendarRequest>,
) -> Result<impl IntoResponse, AppError> {
    let calendar = Calendar::new(request.into_name()?, user.user_id);
    state.store.create_calendar(&calendar).await?;

    tracing::info!(calendar_id = %calendar.id, owner = %user.user_id, "Calendar created");
    Ok((StatusCode::CREATED, Json(calendar)))
}

/// Calendars owned by the caller
pub async fn list_calendars(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, AppError> {
    let calendars = state.store.list_calendars_by_owner(user.user_id).await?;
    Ok(Json(calendars))
}

pub async fn update_calendar(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(calendar_id): Path<String>,
    ApiJson(request): ApiJson<CalendarRequest>,
) -> Result<impl IntoResponse, AppError> {
    let calendar_id = parse_id(&calendar_id, calendar_not_found)?;
    let name = request.into_name()?;

    let calendar = state
        .store
        .rename_calendar(calendar_id, user.user_id, &name)
        .await?
        .ok_or_else(calendar_not_found)?;

    Ok(Json(calendar))
}

/// Delete a calendar
///
/// Events it referenced stay in the event store.
pub async fn delete_calendar(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(calendar_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let calendar_id = parse_id(&calendar_id, calendar_not_found)?;

    if !state.store.delete_calendar(calendar_id, user.user_id).await? {
        return Err(calendar_not_found());
    }

    tracing::info!(calendar_id = %calendar_id, owner = %user.user_id, "Calendar deleted");
    Ok(Json(MessageResponse::new("Calendar deleted successfully")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calendar_name_is_trimmed_and_required() {
        let name = CalendarRequest {
            name: Some("  Work ".to_string()),
        }
        .into_name()
        .unwrap();
        assert_eq!(name, "Work");

        assert!(CalendarRequest { name: None }.into_name().is_err());
        assert!(CalendarRequest {
            name: Some("   ".to_string())
        }
        .into_name()
        .is_err());
    }

    #[test]
    fn test_malformed_id_is_not_found() {
        let err = parse_id("not-a-uuid", calendar_not_found).unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
