//! VeloHub monitoring server library logic.

pub mod api_monitor;
pub mod config;
pub mod middleware;

use axum::{routing::get, Extension, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use velohub_monitor::{Dispatcher, MonitorConfig, Publisher};

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Sequencer, replay buffer, and client registry.
    pub dispatcher: Arc<Dispatcher>,
    /// Emission handle wired to `dispatcher`.
    pub publisher: Publisher,
}

impl AppState {
    /// Builds the state around a fresh dispatcher.
    pub fn new(monitor: &MonitorConfig) -> Self {
        let dispatcher = Dispatcher::shared(monitor);
        let publisher = Publisher::new(dispatcher.clone());
        Self {
            dispatcher,
            publisher,
        }
    }
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            api_monitor::STREAM_PATH,
            get(api_monitor::get_monitor_stream_handler),
        )
        .route(
            "/api/monitor/stats",
            get(api_monitor::get_monitor_stats_handler),
        )
        .route(
            "/api/monitor/events",
            get(api_monitor::get_monitor_events_handler),
        )
        .layer(axum::middleware::from_fn(middleware::traffic_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
