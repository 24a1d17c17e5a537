use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::sync::Arc;
use velohub_monitor::TrafficStatus;

use crate::AppState;

/// Path prefixes served by the monitor itself. Traffic on these is not
/// reported, or every dashboard poll would show up on the dashboard.
const UNTRACKED_PREFIXES: &[&str] = &["/events/", "/api/monitor/"];

/// Maps a response status code onto the traffic marker vocabulary.
pub fn traffic_status_for(status: axum::http::StatusCode) -> TrafficStatus {
    if status.is_server_error() {
        TrafficStatus::Error
    } else if status.is_client_error() {
        TrafficStatus::Warning
    } else {
        TrafficStatus::Completed
    }
}

/// Emits a `received` traffic marker when a request arrives and a
/// `completed`/`warning`/`error` marker when its response is ready.
pub async fn traffic_middleware(req: Request<Body>, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if UNTRACKED_PREFIXES.iter().any(|p| path.starts_with(p)) {
        return next.run(req).await;
    }

    let Some(state) = req.extensions().get::<Arc<AppState>>().cloned() else {
        return next.run(req).await;
    };

    let origin = format!("{} {}", req.method(), path);
    state
        .publisher
        .emit_traffic(&origin, TrafficStatus::Received, "request received");

    let response = next.run(req).await;

    let status = response.status();
    state.publisher.emit_traffic(
        &origin,
        traffic_status_for(status),
        status.to_string(),
    );

    response
}
