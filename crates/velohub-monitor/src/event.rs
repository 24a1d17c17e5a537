//! Event category, identifier, and envelope types.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Categories carried on the monitor stream.
///
/// The first four are emitted by the backend through the publisher. The last
/// two are synthesised by the connection lifecycle and never enter the
/// replay buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// A log line mirrored from the backend.
    #[serde(rename = "log")]
    Log,
    /// A request-traffic marker (received, processing, completed, ...).
    #[serde(rename = "traffic-status")]
    TrafficStatus,
    /// A snapshot of a payload the backend sent out.
    #[serde(rename = "outbound-payload")]
    OutboundPayload,
    /// A snapshot of a payload the backend received.
    #[serde(rename = "inbound-payload")]
    InboundPayload,
    /// The welcome envelope written once per new connection.
    #[serde(rename = "connected")]
    Connected,
    /// Keep-alive marker. Never sequenced.
    #[serde(rename = "heartbeat")]
    Heartbeat,
}

impl EventCategory {
    /// Returns the canonical wire label for this category.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::TrafficStatus => "traffic-status",
            Self::OutboundPayload => "outbound-payload",
            Self::InboundPayload => "inbound-payload",
            Self::Connected => "connected",
            Self::Heartbeat => "heartbeat",
        }
    }

    /// Whether envelopes of this category are sequenced and buffered.
    pub fn is_persisted(self) -> bool {
        !matches!(self, Self::Connected | Self::Heartbeat)
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventCategory {
    type Err = ParseEventCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log" => Ok(Self::Log),
            "traffic-status" => Ok(Self::TrafficStatus),
            "outbound-payload" => Ok(Self::OutboundPayload),
            "inbound-payload" => Ok(Self::InboundPayload),
            "connected" => Ok(Self::Connected),
            "heartbeat" => Ok(Self::Heartbeat),
            _ => Err(ParseEventCategoryError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown event category string.
#[derive(Debug, Clone)]
pub struct ParseEventCategoryError(pub String);

impl std::fmt::Display for ParseEventCategoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown event category: {}", self.0)
    }
}

impl std::error::Error for ParseEventCategoryError {}

/// Position of an envelope in the emission history.
///
/// Identifiers are issued by the [`Sequencer`](crate::Sequencer) starting at
/// 1; [`EventId::ZERO`] means "nothing seen yet".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EventId(u64);

impl EventId {
    /// The position before any envelope was emitted.
    pub const ZERO: EventId = EventId(0);

    /// Wraps a raw counter value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw counter value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EventId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// The atomic unit broadcast to monitoring clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Strictly increasing position; the only field used for ordering.
    pub id: EventId,
    /// What kind of event this is.
    pub category: EventCategory,
    /// Random correlation token. Carries no ordering meaning.
    pub token: Uuid,
    /// Caller-supplied payload, opaque to the broadcast layer.
    pub payload: serde_json::Value,
    /// When the envelope was sequenced. Diagnostic only.
    pub created_at: DateTime<Utc>,
}

impl Envelope {
    /// Builds an envelope stamped with the current time and a fresh token.
    pub fn new(id: EventId, category: EventCategory, payload: serde_json::Value) -> Self {
        Self {
            id,
            category,
            token: Uuid::new_v4(),
            payload,
            created_at: Utc::now(),
        }
    }
}

/// A unit written to a client connection.
#[derive(Debug, Clone)]
pub enum Frame {
    /// A data envelope (sequenced, replayed, or the welcome envelope).
    Event(Arc<Envelope>),
    /// A keep-alive with no data.
    Heartbeat,
}

impl Frame {
    /// Returns the envelope carried by this frame, if any.
    #[cfg(test)]
    pub(crate) fn envelope(&self) -> Option<&Envelope> {
        match self {
            Self::Event(envelope) => Some(envelope),
            Self::Heartbeat => None,
        }
    }
}
