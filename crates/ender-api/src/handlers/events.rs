//! Event log endpoints

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use utoipa::IntoParams;

use ender_store::Event;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::state::AppState;

#[derive(Debug, Deserialize, IntoParams)]
pub struct EventsQuery {
    pub limit: Option<i64>,
}

/// Most recent events, newest first
#[utoipa::path(
    get,
    path = "/api/v1/events",
    params(EventsQuery),
    responses((status = 200, description = "Events", body = Vec<Event>)),
    tag = "Events"
)]
pub async fn recent_events(
    _user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<Event>>> {
    let limit = query.limit.filter(|l| *l > 0).unwrap_or(20);
    Ok(Json(state.events.recent(limit).await?))
}
