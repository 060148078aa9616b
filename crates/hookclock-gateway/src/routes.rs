//! Route handlers for the inspection / admin API.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use hookclock_scheduler::events::{
    CronEventFilter, InvocationFilter, NewOneOffEvent, OneOffEventFilter, Pagination,
};
use hookclock_scheduler::{EventKind, EventStatus, SchedulerError};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::server::AppState;

type ApiResponse = (StatusCode, Json<Value>);

const MAX_PAGE_SIZE: u32 = 1000;

fn ok(body: Value) -> ApiResponse {
    (StatusCode::OK, Json(body))
}

fn error(status: StatusCode, message: impl std::fmt::Display) -> ApiResponse {
    (status, Json(json!({"ok": false, "error": message.to_string()})))
}

fn store_error(e: SchedulerError) -> ApiResponse {
    tracing::warn!("⚠️ Store error in API: {e}");
    error(StatusCode::INTERNAL_SERVER_ERROR, e)
}

/// Query parameters shared by the event listings.
#[derive(Debug, Default, Deserialize)]
pub struct EventQuery {
    pub trigger_name: Option<String>,
    /// Comma-separated statuses, e.g. `scheduled,locked`.
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvocationQuery {
    /// `cron` (default) or `one_off`.
    pub kind: Option<String>,
    pub event_id: Option<String>,
    pub trigger_name: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

fn pagination(limit: Option<u32>, offset: Option<u32>) -> Pagination {
    let default = Pagination::default();
    Pagination {
        limit: limit.unwrap_or(default.limit).min(MAX_PAGE_SIZE),
        offset: offset.unwrap_or(0),
    }
}

fn parse_statuses(raw: Option<&str>) -> Result<Vec<EventStatus>, String> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

/// Health check endpoint.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "hookclock-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Engine counters and how many events this instance currently holds.
pub async fn engine_stats(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "events": state.reporter.stats(),
        "locked": {
            "cron": state.locked.len(EventKind::Cron),
            "one_off": state.locked.len(EventKind::OneOff),
        },
    }))
}

/// Current cron trigger snapshot, sorted by name.
pub async fn list_cron_triggers(State(state): State<Arc<AppState>>) -> Json<Value> {
    let snapshot = state.triggers.snapshot();
    let mut triggers: Vec<_> = snapshot.values().collect();
    triggers.sort_by(|a, b| a.name.cmp(&b.name));
    Json(json!({ "cron_triggers": triggers }))
}

pub async fn list_cron_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventQuery>,
) -> ApiResponse {
    let statuses = match parse_statuses(query.status.as_deref()) {
        Ok(s) => s,
        Err(e) => return error(StatusCode::BAD_REQUEST, e),
    };
    let filter = CronEventFilter {
        trigger_name: query.trigger_name,
        statuses,
    };
    match state
        .store
        .list_cron_events(&filter, pagination(query.limit, query.offset))
        .await
    {
        Ok(page) => ok(json!({ "events": page.rows, "count": page.count })),
        Err(e) => store_error(e),
    }
}

pub async fn list_one_off_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventQuery>,
) -> ApiResponse {
    let statuses = match parse_statuses(query.status.as_deref()) {
        Ok(s) => s,
        Err(e) => return error(StatusCode::BAD_REQUEST, e),
    };
    match state
        .store
        .list_one_off_events(&OneOffEventFilter { statuses }, pagination(query.limit, query.offset))
        .await
    {
        Ok(page) => ok(json!({ "events": page.rows, "count": page.count })),
        Err(e) => store_error(e),
    }
}

/// Schedule a one-off webhook call.
pub async fn create_one_off_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<NewOneOffEvent>,
) -> ApiResponse {
    if let Err(e) = event.retry_conf.validate() {
        return error(StatusCode::BAD_REQUEST, format!("Invalid retry_conf: {e}"));
    }
    match state.store.create_one_off_event(event, state.clock.now()).await {
        Ok(created) => {
            tracing::info!("📅 One-off event {} scheduled for {}", created.id, created.scheduled_time);
            (StatusCode::CREATED, Json(json!({ "ok": true, "event": created })))
        }
        Err(e) => store_error(e),
    }
}

pub async fn delete_one_off_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.store.delete_one_off_event(&id).await {
        Ok(true) => ok(json!({ "ok": true, "message": format!("One-off event '{id}' deleted") })),
        Ok(false) => error(StatusCode::NOT_FOUND, format!("One-off event '{id}' not found")),
        Err(e @ SchedulerError::Locked { .. }) => error(StatusCode::CONFLICT, e),
        Err(e) => store_error(e),
    }
}

pub async fn list_invocations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<InvocationQuery>,
) -> ApiResponse {
    let kind = match query.kind.as_deref().unwrap_or("cron").parse::<EventKind>() {
        Ok(kind) => kind,
        Err(e) => return error(StatusCode::BAD_REQUEST, e),
    };
    let filter = match query.event_id {
        Some(event_id) => InvocationFilter::Event { kind, event_id },
        None => InvocationFilter::Kind {
            kind,
            trigger_name: query.trigger_name,
        },
    };
    match state
        .store
        .list_invocations(&filter, pagination(query.limit, query.offset))
        .await
    {
        Ok(page) => ok(json!({ "invocations": page.rows, "count": page.count })),
        Err(e) => store_error(e),
    }
}
