//! The emission surface used by the rest of the backend.
//!
//! Business code holds a [`Publisher`] (or reaches the process-wide one via
//! [`global`]) and calls the four `emit_*` functions unconditionally. Before
//! a dispatcher is wired in, every call is a no-op.

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::dispatcher::Dispatcher;
use crate::event::EventCategory;

/// Severity of a mirrored log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Stage of a request as reported by a traffic marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficStatus {
    Received,
    Processing,
    Completed,
    Warning,
    Error,
}

#[derive(Serialize)]
struct LogPayload<'a> {
    level: LogLevel,
    message: &'a str,
}

#[derive(Serialize)]
struct TrafficPayload<'a> {
    origin: &'a str,
    status: TrafficStatus,
    message: &'a str,
}

/// Cheap, cloneable handle for emitting monitor events.
///
/// [`Publisher::disabled`] (also the `Default`) drops everything.
#[derive(Debug, Clone, Default)]
pub struct Publisher {
    dispatcher: Option<Arc<Dispatcher>>,
}

static DISABLED: Publisher = Publisher { dispatcher: None };
static GLOBAL: OnceLock<Publisher> = OnceLock::new();

impl Publisher {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher: Some(dispatcher),
        }
    }

    /// A publisher with no dispatcher behind it.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.dispatcher.is_some()
    }

    /// Mirrors a log line to monitoring clients.
    pub fn emit_log(&self, level: LogLevel, message: impl AsRef<str>) {
        self.emit(EventCategory::Log, &LogPayload {
            level,
            message: message.as_ref(),
        });
    }

    /// Emits a request-traffic marker.
    pub fn emit_traffic(&self, origin: impl AsRef<str>, status: TrafficStatus, message: impl AsRef<str>) {
        self.emit(EventCategory::TrafficStatus, &TrafficPayload {
            origin: origin.as_ref(),
            status,
            message: message.as_ref(),
        });
    }

    /// Emits a snapshot of a payload the backend is sending out.
    pub fn emit_json<T: Serialize + ?Sized>(&self, value: &T) {
        self.emit(EventCategory::OutboundPayload, value);
    }

    /// Emits a snapshot of a payload the backend received.
    pub fn emit_json_input<T: Serialize + ?Sized>(&self, value: &T) {
        self.emit(EventCategory::InboundPayload, value);
    }

    fn emit<T: Serialize + ?Sized>(&self, category: EventCategory, value: &T) {
        let Some(dispatcher) = &self.dispatcher else {
            return;
        };
        match serde_json::to_value(value) {
            Ok(payload) => {
                dispatcher.publish(category, payload);
            }
            Err(e) => {
                tracing::warn!(category = %category, "failed to serialize monitor payload: {}", e);
            }
        }
    }
}

/// Installs the process-wide publisher. Only the first call takes effect.
///
/// Returns `false` if a publisher was already installed.
pub fn install_global(publisher: Publisher) -> bool {
    GLOBAL.set(publisher).is_ok()
}

/// Returns the process-wide publisher, or a disabled one before
/// [`install_global`] has run.
pub fn global() -> &'static Publisher {
    GLOBAL.get().unwrap_or(&DISABLED)
}
