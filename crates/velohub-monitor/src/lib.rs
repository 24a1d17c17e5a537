//! Real-time event broadcast for the VeloHub monitoring dashboard.
//!
//! Every backend action (a log line, a request-traffic marker, an outbound or
//! inbound payload snapshot) is published as an [`Envelope`] and fanned out
//! to every connected monitoring client. The most recent envelopes are kept
//! in a bounded [`ReplayBuffer`] so a client that reconnects can recover what
//! it missed, as long as it was not gone for longer than the buffer retains.
//!
//! # Components
//!
//! | Component | Role |
//! |-----------|------|
//! | [`Sequencer`] | Strictly increasing [`EventId`]s |
//! | [`ReplayBuffer`] | Last N envelopes, oldest evicted first |
//! | [`ClientRegistry`] | Attached connections and their positions |
//! | [`Dispatcher`] | Sequence, buffer, and fan out under one lock |
//! | [`Session`] | Handshake, replay, heartbeat, and teardown |
//! | [`Publisher`] | `emit_*` surface, a no-op until wired |
//!
//! # Usage
//!
//! ```rust,ignore
//! use velohub_monitor::{Dispatcher, LogLevel, MonitorConfig, Publisher, Session};
//!
//! let dispatcher = Dispatcher::shared(&MonitorConfig::default());
//! let publisher = Publisher::new(dispatcher.clone());
//! publisher.emit_log(LogLevel::Info, "GET /api/faq-bot");
//!
//! let mut session = Session::open(&dispatcher, None)?;
//! while let Some(frame) = session.recv().await {
//!     // write the frame to the transport
//! }
//! ```

mod buffer;
mod config;
mod dispatcher;
mod error;
mod event;
mod lifecycle;
mod publisher;
mod registry;
mod sequencer;

pub use buffer::ReplayBuffer;
pub use config::{MonitorConfig, DEFAULT_BUFFER_CAPACITY, DEFAULT_HEARTBEAT_INTERVAL};
pub use dispatcher::{Dispatcher, MonitorStats};
pub use error::MonitorError;
pub use event::{Envelope, EventCategory, EventId, Frame, ParseEventCategoryError};
pub use lifecycle::{Session, SessionState};
pub use publisher::{global, install_global, LogLevel, Publisher, TrafficStatus};
pub use registry::{ClientId, ClientRecord, ClientRegistry, Visit};
pub use sequencer::Sequencer;

#[cfg(test)]
mod tests;
