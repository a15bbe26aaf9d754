//! HTTP surface: fanout WebSocket, event-log API, status endpoint.

pub mod eventlog;
pub mod status;

use crate::state::AppState;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(crate::ws::ws_handler))
        .route(
            "/api/event-log",
            get(eventlog::query_events).post(eventlog::ingest_event),
        )
        .route("/api/event-log/stats", get(eventlog::event_stats))
        .route("/api/status", get(status::status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
