//! Bounded history of recently published envelopes.
//!
//! The `ReplayBuffer` keeps the last N envelopes in emission order. A client
//! reconnecting with a known position receives everything newer than that
//! position; a client presenting nothing (or a position that has already
//! been evicted) receives the whole buffer.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::event::{Envelope, EventId};

/// FIFO store of the most recent envelopes.
///
/// Contents are always a contiguous suffix of the emission history: appends
/// must arrive in increasing id order, and eviction only ever removes the
/// oldest entry.
#[derive(Debug)]
pub struct ReplayBuffer {
    entries: VecDeque<Arc<Envelope>>,
    capacity: usize,
}

impl ReplayBuffer {
    /// Creates an empty buffer retaining at most `capacity` envelopes.
    ///
    /// A zero capacity is clamped to one; configuration validation rejects
    /// zero before it gets here.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends an envelope at the tail, evicting from the head when full.
    pub fn append(&mut self, envelope: Arc<Envelope>) {
        debug_assert!(
            self.tail_id().map_or(true, |tail| tail < envelope.id),
            "replay buffer appends must be in increasing id order"
        );
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(envelope);
    }

    /// Returns every buffered envelope newer than `after`, oldest first.
    ///
    /// `None` returns the entire buffer. A position older than the oldest
    /// retained envelope also returns the entire buffer; the resulting gap
    /// is not detectable here.
    pub fn since(&self, after: Option<EventId>) -> Vec<Arc<Envelope>> {
        let start = match after {
            Some(after) => self.entries.partition_point(|e| e.id <= after),
            None => 0,
        };
        self.entries.range(start..).cloned().collect()
    }

    /// Id of the newest buffered envelope.
    pub fn tail_id(&self) -> Option<EventId> {
        self.entries.back().map(|e| e.id)
    }

    /// Id of the oldest buffered envelope.
    pub fn head_id(&self) -> Option<EventId> {
        self.entries.front().map(|e| e.id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
