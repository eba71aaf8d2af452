//! Lazy, paged reading of one entity stream.

use std::collections::VecDeque;

use counterflow_core::EntityId;

use super::r#trait::{EventStore, EventStoreError, StoredEvent};

/// Lazy, restartable, finite iterator over an entity stream.
///
/// Pages through [`EventStore::read_from`] in batches and stops at the tail
/// observed when the stream was opened (or last restarted); entries appended
/// afterwards are picked up by the next `open`/`restart`.
#[derive(Debug)]
pub struct EventStream<'a, S: ?Sized> {
    store: &'a S,
    entity_id: EntityId,
    start: u64,
    next: u64,
    tail: u64,
    batch_size: usize,
    buffer: VecDeque<StoredEvent>,
    exhausted: bool,
}

impl<'a, S> EventStream<'a, S>
where
    S: EventStore + ?Sized,
{
    pub fn open(
        store: &'a S,
        entity_id: EntityId,
        from_sequence: u64,
        batch_size: usize,
    ) -> Result<Self, EventStoreError> {
        let tail = store.stream_version(&entity_id)?;
        let start = from_sequence.max(1);
        Ok(Self {
            store,
            entity_id,
            start,
            next: start,
            tail,
            batch_size: batch_size.max(1),
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }

    /// Rewind to the original start position and refresh the tail.
    pub fn restart(&mut self) -> Result<(), EventStoreError> {
        self.tail = self.store.stream_version(&self.entity_id)?;
        self.next = self.start;
        self.buffer.clear();
        self.exhausted = false;
        Ok(())
    }

    /// Tail sequence number this pass will stop at.
    pub fn tail(&self) -> u64 {
        self.tail
    }

    fn fill(&mut self) -> Result<(), EventStoreError> {
        let remaining = self.tail - self.next + 1;
        let limit = usize::try_from(remaining)
            .unwrap_or(usize::MAX)
            .min(self.batch_size);
        let page = self.store.read_from(&self.entity_id, self.next, Some(limit))?;

        match page.last() {
            Some(last) => {
                self.next = last.sequence_number + 1;
                self.buffer.extend(page);
            }
            None => self.exhausted = true,
        }
        Ok(())
    }
}

impl<S> Iterator for EventStream<'_, S>
where
    S: EventStore + ?Sized,
{
    type Item = Result<StoredEvent, EventStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            if self.exhausted || self.next > self.tail {
                return None;
            }
            if let Err(err) = self.fill() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::{InMemoryEventStore, UncommittedEvent};
    use counterflow_core::ExpectedVersion;
    use counterflow_events::Metadata;
    use serde_json::json;
    use uuid::Uuid;

    fn seed(store: &InMemoryEventStore, id: &EntityId, count: u64) {
        let events = (0..count)
            .map(|n| UncommittedEvent {
                event_id: Uuid::now_v7(),
                entity_id: id.clone(),
                entity_type: "counter".to_string(),
                event_type: "value-increased".to_string(),
                event_version: 1,
                payload: json!({ "n": n }),
                metadata: Metadata::new(),
            })
            .collect();
        store.append(id, events, ExpectedVersion::Any).unwrap();
    }

    fn sequences<S: EventStore + ?Sized>(stream: &mut EventStream<'_, S>) -> Vec<u64> {
        stream.map(|e| e.unwrap().sequence_number).collect()
    }

    #[test]
    fn pages_through_whole_stream_in_order() {
        let store = InMemoryEventStore::new();
        let id = EntityId::new("paged").unwrap();
        seed(&store, &id, 7);

        let mut stream = EventStream::open(&store, id, 1, 3).unwrap();
        assert_eq!(sequences(&mut stream), (1..=7).collect::<Vec<_>>());
    }

    #[test]
    fn stops_at_tail_seen_when_opened() {
        let store = InMemoryEventStore::new();
        let id = EntityId::new("growing").unwrap();
        seed(&store, &id, 2);

        let mut stream = EventStream::open(&store, id.clone(), 2, 10).unwrap();
        seed(&store, &id, 2);

        assert_eq!(sequences(&mut stream), vec![2]);

        stream.restart().unwrap();
        assert_eq!(stream.tail(), 4);
        assert_eq!(sequences(&mut stream), vec![2, 3, 4]);
    }

    #[test]
    fn empty_stream_yields_nothing() {
        let store = InMemoryEventStore::new();
        let id = EntityId::new("nothing").unwrap();
        let mut stream = EventStream::open(&store, id, 1, 10).unwrap();
        assert!(stream.next().is_none());
    }
}
