//! HTTP API handlers over the engine surface.
//!
//! Routes are thin: deserialize the query, call the engine, serialize the
//! result. The event stream is served as SSE, one engine subscription per
//! connection; a lagged connection receives a `refresh` event and is expected
//! to reload from `/api/tree`.

use axum::extract::{Json, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::engine::Engine;
use crate::events::IndexEvent;
use crate::settings::SettingsPatch;

/// Search terms shorter than this are rejected at the transport boundary.
pub const MIN_SEARCH_TERM: usize = 2;

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error_body(status: StatusCode, kind: &str, message: String) -> ApiError {
    (status, Json(serde_json::json!({ "error": { "kind": kind, "message": message } })))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

pub async fn api_health(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    let status = engine.status();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "files": status.files_indexed,
        "watcher": status.watcher_active,
    }))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

pub async fn api_tree(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    Json(engine.tree())
}

#[derive(Deserialize)]
pub struct FileQuery {
    path: String,
}

pub async fn api_file(
    State(engine): State<Arc<Engine>>,
    Query(q): Query<FileQuery>,
) -> Result<impl IntoResponse, ApiError> {
    match engine.file(&q.path) {
        Some(summary) => Ok(Json(summary)),
        None => Err(error_body(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no indexed file at '{}'", q.path),
        )),
    }
}

#[derive(Deserialize)]
pub struct SearchQuery {
    q: String,
    limit: Option<usize>,
}

pub async fn api_search(
    State(engine): State<Arc<Engine>>,
    Query(q): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let term = q.q.trim();
    if term.chars().count() < MIN_SEARCH_TERM {
        return Err(error_body(
            StatusCode::BAD_REQUEST,
            "term_too_short",
            format!("search term must be at least {MIN_SEARCH_TERM} characters"),
        ));
    }
    Ok(Json(engine.search(term, q.limit)))
}

pub async fn api_status(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    Json(engine.status())
}

// ---------------------------------------------------------------------------
// Control
// ---------------------------------------------------------------------------

pub async fn api_rescan(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    engine.rescan();
    Json(serde_json::json!({ "scheduled": true }))
}

pub async fn api_get_settings(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    Json(engine.settings())
}

pub async fn api_apply_settings(
    State(engine): State<Arc<Engine>>,
    Json(patch): Json<SettingsPatch>,
) -> Result<impl IntoResponse, ApiError> {
    match engine.apply_settings(patch) {
        Ok(applied) => Ok(Json(applied)),
        Err(e) => Err(error_body(StatusCode::BAD_REQUEST, e.kind(), e.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Event stream
// ---------------------------------------------------------------------------

pub async fn api_events(
    State(engine): State<Arc<Engine>>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = engine.subscribe().into_receiver();
    let stream = BroadcastStream::new(rx).map(|msg| {
        let event = match msg {
            Ok(event) => event,
            Err(BroadcastStreamRecvError::Lagged(_)) => IndexEvent::Refresh,
        };
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok::<_, Infallible>(SseEvent::default().event(event.kind()).data(data))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
