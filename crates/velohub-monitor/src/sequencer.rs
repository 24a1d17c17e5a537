//! Monotonic identifier source for envelopes.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::event::EventId;

/// Issues strictly increasing [`EventId`]s.
///
/// Safe to call from any number of tasks or threads; every call observes a
/// distinct value greater than all values returned before it.
#[derive(Debug, Default)]
pub struct Sequencer {
    last: AtomicU64,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next identifier.
    pub fn next(&self) -> EventId {
        EventId::new(self.last.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Returns the most recently issued identifier, or [`EventId::ZERO`].
    pub fn current(&self) -> EventId {
        EventId::new(self.last.load(Ordering::Acquire))
    }
}
