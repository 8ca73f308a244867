//! In-memory buffer of events awaiting the next flush.
//!
//! The buffer is owned by the pipeline worker thread, so appends and drains
//! are serialized by construction and need no locking. Producers reach it by
//! sending events over the worker's command channel.

use std::mem;

use crate::log_event::FemtoLogEvent;

#[derive(Debug, Default)]
pub struct EventBuffer {
    events: Vec<FemtoLogEvent>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `event` to the tail. The buffer is unbounded.
    pub fn append(&mut self, event: FemtoLogEvent) {
        self.events.push(event);
    }

    /// Remove and return every buffered event in insertion order.
    ///
    /// Returns `None` when nothing is buffered so callers can skip the flush.
    pub fn drain_all(&mut self) -> Option<Vec<FemtoLogEvent>> {
        if self.events.is_empty() {
            return None;
        }
        Some(mem::take(&mut self.events))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn drain_on_empty_buffer_returns_none() {
        let mut buffer = EventBuffer::new();
        assert!(buffer.drain_all().is_none());
    }

    #[test]
    fn drain_leaves_buffer_empty() {
        let mut buffer = EventBuffer::new();
        buffer.append(FemtoLogEvent::new("a"));
        buffer.append(FemtoLogEvent::new("b"));
        assert_eq!(buffer.len(), 2);
        let drained = buffer.drain_all().expect("events");
        assert_eq!(drained.len(), 2);
        assert!(buffer.is_empty());
        assert!(buffer.drain_all().is_none());
    }

    proptest! {
        #[test]
        fn drain_preserves_insertion_order(lines in proptest::collection::vec(".*", 1..64)) {
            let mut buffer = EventBuffer::new();
            for line in &lines {
                buffer.append(FemtoLogEvent::new(line.clone()));
            }
            let drained = buffer.drain_all().expect("events");
            let texts: Vec<&str> = drained.iter().map(FemtoLogEvent::raw_text).collect();
            prop_assert_eq!(texts, lines.iter().map(String::as_str).collect::<Vec<_>>());
        }
    }
}
