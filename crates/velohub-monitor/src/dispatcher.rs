//! Sequencing and fan-out of published envelopes.
//!
//! All writes go through [`Dispatcher::publish`], which stamps an envelope
//! with the next identifier, appends it to the replay buffer, and pushes it
//! to every registered client. The three steps run under one lock so that
//! buffer order, id order, and per-client delivery order always agree, even
//! when several tasks publish at once. Client writes are non-blocking channel
//! sends, so the lock is never held across I/O.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;

use crate::buffer::ReplayBuffer;
use crate::config::MonitorConfig;
use crate::event::{Envelope, EventCategory, EventId};
use crate::registry::{ClientId, ClientRegistry, Visit};
use crate::sequencer::Sequencer;

/// Shared mutable state guarded by the dispatcher lock.
#[derive(Debug)]
pub(crate) struct Hub {
    pub(crate) buffer: ReplayBuffer,
    pub(crate) registry: ClientRegistry,
    pub(crate) closed: bool,
}

/// Point-in-time counters for the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStats {
    pub connected_clients: usize,
    pub buffered_events: usize,
    pub buffer_capacity: usize,
    /// Oldest id still replayable; a client whose position is older has
    /// missed events.
    pub oldest_event_id: Option<EventId>,
    pub last_event_id: EventId,
}

/// Owns the sequencer, replay buffer, and client registry.
#[derive(Debug)]
pub struct Dispatcher {
    sequencer: Sequencer,
    hub: Mutex<Hub>,
    heartbeat_interval: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher from validated settings.
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            sequencer: Sequencer::new(),
            hub: Mutex::new(Hub {
                buffer: ReplayBuffer::with_capacity(config.buffer_capacity),
                registry: ClientRegistry::new(),
                closed: false,
            }),
            heartbeat_interval: config.heartbeat_interval(),
        }
    }

    /// Convenience constructor returning the dispatcher behind an `Arc`.
    pub fn shared(config: &MonitorConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    /// Sequences, buffers, and fans out one envelope.
    ///
    /// Every client registered when the call begins receives the envelope
    /// exactly once. A client whose connection is gone is unregistered on the
    /// spot; the failure never reaches the caller.
    ///
    /// Returns `None` for categories that are never sequenced
    /// ([`EventCategory::Connected`], [`EventCategory::Heartbeat`]).
    pub fn publish(&self, category: EventCategory, payload: serde_json::Value) -> Option<EventId> {
        if !category.is_persisted() {
            tracing::warn!(category = %category, "refusing to publish unsequenced category");
            return None;
        }

        let mut hub = self.lock_hub();
        let id = self.sequencer.next();
        let envelope = Arc::new(Envelope::new(id, category, payload));
        hub.buffer.append(Arc::clone(&envelope));

        hub.registry.for_each(|client| match client.deliver(&envelope) {
            Ok(_) => Visit::Keep,
            Err(e) => {
                tracing::debug!(client_id = %client.id(), "dropping monitor client: {}", e);
                Visit::Remove
            }
        });

        tracing::trace!(id = %id, category = %category, "published monitor event");
        Some(id)
    }

    /// Removes a client from fan-out. Safe to call more than once.
    pub fn unregister(&self, client: ClientId) -> bool {
        self.lock_hub().registry.unregister(client)
    }

    /// Returns buffered envelopes newer than `after`, oldest first.
    pub fn since(&self, after: Option<EventId>) -> Vec<Arc<Envelope>> {
        self.lock_hub().buffer.since(after)
    }

    /// Closes every connection and refuses new ones.
    ///
    /// Dropping each client's sender ends its stream; the owning session
    /// observes the end and moves to `Closed`.
    pub fn shutdown(&self) -> usize {
        let mut hub = self.lock_hub();
        hub.closed = true;
        let dropped = hub.registry.clear();
        tracing::info!(clients = dropped, "monitor dispatcher shut down");
        dropped
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock_hub().closed
    }

    pub fn stats(&self) -> MonitorStats {
        let hub = self.lock_hub();
        MonitorStats {
            connected_clients: hub.registry.len(),
            buffered_events: hub.buffer.len(),
            buffer_capacity: hub.buffer.capacity(),
            oldest_event_id: hub.buffer.head_id(),
            last_event_id: self.sequencer.current(),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Acquires the hub lock, recovering from poisoning.
    ///
    /// A poisoned hub still holds a consistent buffer and registry: every
    /// mutation is a single append, insert, or remove.
    pub(crate) fn lock_hub(&self) -> MutexGuard<'_, Hub> {
        match self.hub.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("monitor hub lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}
