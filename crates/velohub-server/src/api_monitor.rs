//! Monitor API handlers.
//!
//! Provides:
//! - `GET /events/monitor` — SSE stream with reconnection replay
//! - `GET /api/monitor/events` — JSON snapshot of the replay buffer
//! - `GET /api/monitor/stats` — connection and buffer counters

use crate::AppState;
use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use tokio_stream::StreamExt;
use velohub_monitor::{Envelope, EventId, Frame, MonitorStats, Session};

/// Route of the streaming endpoint.
pub const STREAM_PATH: &str = "/events/monitor";

/// Standard SSE reconnection header.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// Query parameters for `GET /events/monitor`.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Fallback for clients that cannot set `Last-Event-ID` themselves.
    #[serde(rename = "lastEventId")]
    pub last_event_id: Option<String>,
}

/// Resolves the client's last seen position.
///
/// The `Last-Event-ID` header wins over the query parameter. Values that do
/// not parse are treated as absent.
pub fn resolve_last_seen(headers: &HeaderMap, query: &StreamQuery) -> Option<EventId> {
    let raw = headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(query.last_event_id.as_deref())?;

    match raw.parse() {
        Ok(id) => Some(id),
        Err(_) => {
            tracing::debug!(value = raw, "ignoring unparseable last event id");
            None
        }
    }
}

/// Converts a session frame into an SSE event.
///
/// Data frames carry `id`, `event` and a JSON `data` line; heartbeats are
/// comment lines that `EventSource` ignores.
pub fn frame_to_sse(frame: Frame) -> Option<Event> {
    match frame {
        Frame::Heartbeat => Some(Event::default().comment("heartbeat")),
        Frame::Event(envelope) => match serde_json::to_string(&*envelope) {
            Ok(data) => Some(
                Event::default()
                    .id(envelope.id.to_string())
                    .event(envelope.category.as_str())
                    .data(data),
            ),
            Err(e) => {
                tracing::error!(id = %envelope.id, "failed to serialize monitor event: {}", e);
                None
            }
        },
    }
}

/// Handler for `GET /events/monitor`.
///
/// Replays buffered events newer than the presented position, then streams
/// live events until either side closes. The session heartbeats on its own,
/// so no axum keep-alive is layered on top.
pub async fn get_monitor_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, Response> {
    let last_seen = resolve_last_seen(&headers, &params);

    let session = Session::open(&state.dispatcher, last_seen).map_err(|e| {
        tracing::warn!("rejecting monitor connection: {}", e);
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response()
    })?;

    let stream = session.filter_map(|frame| frame_to_sse(frame).map(Ok::<Event, Infallible>));
    Ok(Sse::new(stream))
}

/// Query parameters for `GET /api/monitor/events`.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Return only events newer than this id.
    pub since: Option<String>,
}

/// Response wrapper for buffered event retrieval.
#[derive(Debug, Serialize)]
pub struct EventsResponse {
    /// Buffered events in emission order.
    pub events: Vec<Envelope>,
    /// The number of events returned.
    pub count: usize,
}

/// Handler for `GET /api/monitor/events`.
///
/// Same selection as reconnection replay, for dashboards that poll.
pub async fn get_monitor_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, Response> {
    let since = match params.since.as_deref() {
        Some(raw) => Some(raw.parse::<EventId>().map_err(|_| {
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": format!("invalid since: {}. Expected a non-negative integer event id", raw)
                })),
            )
                .into_response()
        })?),
        None => None,
    };

    let events: Vec<Envelope> = state
        .dispatcher
        .since(since)
        .iter()
        .map(|e| Envelope::clone(e))
        .collect();
    let count = events.len();
    Ok(Json(EventsResponse { events, count }))
}

/// Handler for `GET /api/monitor/stats`.
pub async fn get_monitor_stats_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<MonitorStats> {
    Json(state.dispatcher.stats())
}
