//! Handshake, replay, heartbeat, and teardown for one streaming connection.
//!
//! A [`Session`] walks `Handshaking -> Replaying -> Live -> Closed`. Opening
//! a session replays buffered envelopes newer than the client's last known
//! position, writes a `connected` welcome envelope, registers the client for
//! live fan-out, and starts a heartbeat task. Replay and registration happen
//! under the dispatcher lock, so no envelope published concurrently can fall
//! between the two.
//!
//! The session is also a [`Stream`] of [`Frame`]s. Dropping it, or reaching
//! the end of the stream, closes it.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::dispatcher::Dispatcher;
use crate::error::MonitorError;
use crate::event::{Envelope, EventCategory, EventId, Frame};
use crate::registry::ClientId;

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Replaying,
    Live,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Handshaking => "handshaking",
            Self::Replaying => "replaying",
            Self::Live => "live",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attached monitoring client.
#[derive(Debug)]
pub struct Session {
    client_id: ClientId,
    state: SessionState,
    replayed: usize,
    position: EventId,
    receiver: mpsc::UnboundedReceiver<Frame>,
    heartbeat: Option<JoinHandle<()>>,
    dispatcher: Arc<Dispatcher>,
}

impl Session {
    /// Performs the handshake and returns a live session.
    ///
    /// `last_seen` is the highest id the client received on a previous
    /// connection; `None` replays the whole buffer. Must be called from
    /// within a tokio runtime (the heartbeat is a spawned task).
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::ShuttingDown` once the dispatcher is shut down,
    /// or `MonitorError::ConnectionClosed` if a replay write fails.
    pub fn open(dispatcher: &Arc<Dispatcher>, last_seen: Option<EventId>) -> Result<Self, MonitorError> {
        let mut state = SessionState::Handshaking;
        tracing::debug!(last_seen = ?last_seen.map(EventId::as_u64), %state, "monitor handshake");

        let (sender, receiver) = mpsc::unbounded_channel();
        let mut hub = dispatcher.lock_hub();
        if hub.closed {
            return Err(MonitorError::ShuttingDown);
        }

        state = SessionState::Replaying;
        let backlog = hub.buffer.since(last_seen);
        for envelope in &backlog {
            if sender.send(Frame::Event(Arc::clone(envelope))).is_err() {
                tracing::debug!(%state, "monitor replay write failed, closing");
                return Err(MonitorError::ConnectionClosed);
            }
        }

        let position = backlog
            .last()
            .map(|e| e.id)
            .or_else(|| hub.buffer.tail_id())
            .unwrap_or(EventId::ZERO);

        let welcome = Envelope::new(
            position,
            EventCategory::Connected,
            json!({
                "replayed": backlog.len(),
                "position": position,
                "bufferCapacity": hub.buffer.capacity(),
            }),
        );
        if sender.send(Frame::Event(Arc::new(welcome))).is_err() {
            return Err(MonitorError::ConnectionClosed);
        }

        let heartbeat_sender = sender.downgrade();
        let client_id = hub.registry.register(sender, position);
        drop(hub);

        state = SessionState::Live;
        let heartbeat = tokio::spawn(run_heartbeat(
            heartbeat_sender,
            dispatcher.heartbeat_interval(),
        ));

        tracing::info!(
            client_id = %client_id,
            replayed = backlog.len(),
            position = position.as_u64(),
            "monitor client connected"
        );

        Ok(Self {
            client_id,
            state,
            replayed: backlog.len(),
            position,
            receiver,
            heartbeat: Some(heartbeat),
            dispatcher: Arc::clone(dispatcher),
        })
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of buffered envelopes replayed during the handshake.
    pub fn replayed(&self) -> usize {
        self.replayed
    }

    /// Position the client was registered at after replay.
    pub fn position(&self) -> EventId {
        self.position
    }

    /// Waits for the next frame. Returns `None` once the session is closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        if self.state == SessionState::Closed {
            return None;
        }
        let frame = self.receiver.recv().await;
        if frame.is_none() {
            self.close();
        }
        frame
    }

    /// Returns the next queued frame without waiting, or `None` when nothing
    /// is queued or the session is closed.
    pub fn try_recv(&mut self) -> Option<Frame> {
        if self.state == SessionState::Closed {
            return None;
        }
        match self.receiver.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.close();
                None
            }
        }
    }

    /// Tears the session down: unregisters the client and stops the
    /// heartbeat. Only the first call has any effect.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;

        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        self.dispatcher.unregister(self.client_id);
        self.receiver.close();

        tracing::info!(client_id = %self.client_id, "monitor client disconnected");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl Stream for Session {
    type Item = Frame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        let this = self.get_mut();
        if this.state == SessionState::Closed {
            return Poll::Ready(None);
        }
        match this.receiver.poll_recv(cx) {
            Poll::Ready(None) => {
                this.close();
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

/// Writes a heartbeat every `period` until the connection's sender is gone.
///
/// Holds only a weak sender: once the registry drops the client, the
/// upgrade fails and the task exits on its own.
async fn run_heartbeat(sender: mpsc::WeakUnboundedSender<Frame>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(sender) = sender.upgrade() else {
            break;
        };
        if sender.send(Frame::Heartbeat).is_err() {
            break;
        }
    }
}
