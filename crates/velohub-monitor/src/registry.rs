//! Set of currently attached streaming connections.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::MonitorError;
use crate::event::{Envelope, EventId, Frame};

/// Handle identifying one registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(u64);

impl ClientId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// One live connection and the newest envelope written to it.
#[derive(Debug)]
pub struct ClientRecord {
    id: ClientId,
    sender: mpsc::UnboundedSender<Frame>,
    last_delivered: EventId,
}

impl ClientRecord {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn last_delivered(&self) -> EventId {
        self.last_delivered
    }

    /// Writes a sequenced envelope if the client has not seen it yet.
    ///
    /// Returns `Ok(false)` when the envelope is at or behind the client's
    /// position. The write never blocks: frames queue on the connection's
    /// channel until the transport drains them.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::ConnectionClosed` if the receiving side is gone.
    pub fn deliver(&mut self, envelope: &Arc<Envelope>) -> Result<bool, MonitorError> {
        if envelope.id <= self.last_delivered {
            return Ok(false);
        }
        self.sender
            .send(Frame::Event(Arc::clone(envelope)))
            .map_err(|_| MonitorError::ConnectionClosed)?;
        self.last_delivered = envelope.id;
        Ok(true)
    }
}

/// Outcome of visiting a client during [`ClientRegistry::for_each`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Leave the client registered.
    Keep,
    /// Drop the client from the registry once the visit returns.
    Remove,
}

/// Exclusive owner of all [`ClientRecord`]s.
///
/// Not synchronised on its own; the dispatcher guards it together with the
/// replay buffer so that registration and fan-out observe a single order.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: BTreeMap<ClientId, ClientRecord>,
    next_id: u64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new record positioned at `start` and returns its handle.
    pub fn register(&mut self, sender: mpsc::UnboundedSender<Frame>, start: EventId) -> ClientId {
        self.next_id += 1;
        let id = ClientId(self.next_id);
        self.clients.insert(
            id,
            ClientRecord {
                id,
                sender,
                last_delivered: start,
            },
        );
        id
    }

    /// Removes a record. Returns `false` if it was already gone.
    pub fn unregister(&mut self, id: ClientId) -> bool {
        self.clients.remove(&id).is_some()
    }

    /// Visits every registered client in registration order.
    ///
    /// Clients for which `f` returns [`Visit::Remove`] are dropped after
    /// their visit and are not visited again.
    pub fn for_each<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut ClientRecord) -> Visit,
    {
        self.clients.retain(|_, record| f(record) == Visit::Keep);
    }

    #[cfg(test)]
    pub(crate) fn get(&self, id: ClientId) -> Option<&ClientRecord> {
        self.clients.get(&id)
    }

    /// Drops every record, closing each connection's sending half.
    pub fn clear(&mut self) -> usize {
        let count = self.clients.len();
        self.clients.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
