//! Event-log HTTP API.
//!
//! `POST /api/event-log` accepts one flow event (202) or rejects it
//! structurally (400).  `GET /api/event-log` is filterable and
//! paginated (default limit 50, capped by config).  `GET
//! /api/event-log/stats` aggregates the trailing 24 hours.

use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vf_model::EventLogRecord;
use vf_protocol::{EventLogIngest, EventLogPage, Pagination};
use vf_store::EventLogFilter;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: e.to_string(),
        }),
    )
        .into_response()
}

/// POST /api/event-log
pub async fn ingest_event(
    State(state): State<AppState>,
    payload: Result<Json<EventLogIngest>, JsonRejection>,
) -> Response {
    let Json(ingest) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return bad_request(rejection.to_string()),
    };
    let record = EventLogRecord {
        source: ingest.source,
        server_timestamp: Utc::now(),
        event: ingest.event,
    };
    match state.event_logs.insert(&record).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Deserialize)]
pub struct EventLogQueryParams {
    pub source: Option<String>,
    pub status: Option<String>,
    pub step: Option<String>,
    pub device_family: Option<String>,
    /// RFC 3339, inclusive.
    pub from: Option<String>,
    pub to: Option<String>,
    /// Substring match on error message / patient ref.
    pub q: Option<String>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    50
}

fn parse_time(value: Option<&str>, field: &str) -> Result<Option<DateTime<Utc>>, Response> {
    match value {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| bad_request(format!("invalid `{field}` timestamp: {e}"))),
    }
}

/// GET /api/event-log
pub async fn query_events(
    State(state): State<AppState>,
    Query(params): Query<EventLogQueryParams>,
) -> Response {
    let from = match parse_time(params.from.as_deref(), "from") {
        Ok(from) => from,
        Err(response) => return response,
    };
    let to = match parse_time(params.to.as_deref(), "to") {
        Ok(to) => to,
        Err(response) => return response,
    };
    let limit = params
        .limit
        .clamp(1, state.config.eventlog.page_limit_max);
    let page = params.page.max(1);

    let filter = EventLogFilter {
        source: params.source,
        status: params.status,
        step: params.step,
        device_family: params.device_family,
        from,
        to,
        text: params.q,
        page,
        limit,
    };
    match state.event_logs.query(&filter).await {
        Ok((events, total)) => {
            let pages = total.div_ceil(limit);
            Json(EventLogPage {
                events,
                pagination: Pagination {
                    page,
                    limit,
                    total,
                    pages,
                },
            })
            .into_response()
        }
        Err(e) => internal_error(e),
    }
}

/// GET /api/event-log/stats
pub async fn event_stats(State(state): State<AppState>) -> Response {
    match state.event_logs.stats_24h(Utc::now()).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => internal_error(e),
    }
}
