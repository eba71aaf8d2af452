use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;

use counterflow_core::{EntityId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent, validate_batch};

type Stream = Arc<Mutex<Vec<StoredEvent>>>;

/// In-memory append-only event log.
///
/// Each entity stream has its own mutex: appends to one entity serialize,
/// appends to different entities only share the brief map lookup.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<EntityId, Stream>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    fn existing_stream(&self, entity_id: &EntityId) -> Result<Option<Stream>, EventStoreError> {
        let streams = self.streams.read().map_err(|_| poisoned())?;
        Ok(streams.get(entity_id).cloned())
    }

    fn stream_for_append(&self, entity_id: &EntityId) -> Result<Stream, EventStoreError> {
        if let Some(stream) = self.existing_stream(entity_id)? {
            return Ok(stream);
        }
        let mut streams = self.streams.write().map_err(|_| poisoned())?;
        Ok(streams.entry(entity_id.clone()).or_default().clone())
    }
}

fn poisoned() -> EventStoreError {
    EventStoreError::Backend("lock poisoned".to_string())
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        entity_id: &EntityId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let entity_type = validate_batch(entity_id, &events)?.to_string();

        let stream = self.stream_for_append(entity_id)?;
        let mut stream = stream.lock().map_err(|_| poisoned())?;
        let current = Self::current_version(&stream);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        // Entity type is fixed by the first entry of the stream.
        if let Some(existing) = stream.first() {
            if existing.entity_type != entity_type {
                return Err(EventStoreError::EntityTypeMismatch(format!(
                    "stream entity_type is '{}', attempted append with '{}'",
                    existing.entity_type, entity_type
                )));
            }
        }

        let appended_at = Utc::now();
        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let stored = StoredEvent {
                event_id: e.event_id,
                entity_id: e.entity_id,
                entity_type: e.entity_type,
                sequence_number: next,
                event_type: e.event_type,
                event_version: e.event_version,
                appended_at,
                payload: e.payload,
                metadata: e.metadata,
            };
            next += 1;
            stream.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }

    fn read_from(
        &self,
        entity_id: &EntityId,
        from_sequence: u64,
        limit: Option<usize>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let Some(stream) = self.existing_stream(entity_id)? else {
            return Ok(vec![]);
        };
        let stream = stream.lock().map_err(|_| poisoned())?;

        // Sequence numbers are gapless and 1-based, so they double as indices.
        let start = usize::try_from(from_sequence.max(1) - 1).unwrap_or(usize::MAX);
        let remaining = stream.get(start..).unwrap_or_default();
        let take = limit.unwrap_or(remaining.len()).min(remaining.len());

        Ok(remaining[..take].to_vec())
    }

    fn stream_version(&self, entity_id: &EntityId) -> Result<u64, EventStoreError> {
        match self.existing_stream(entity_id)? {
            Some(stream) => {
                let stream = stream.lock().map_err(|_| poisoned())?;
                Ok(Self::current_version(&stream))
            }
            None => Ok(0),
        }
    }

    fn entity_ids(&self) -> Result<Vec<EntityId>, EventStoreError> {
        let streams = self.streams.read().map_err(|_| poisoned())?;
        let mut ids = Vec::with_capacity(streams.len());
        for (id, stream) in streams.iter() {
            let non_empty = stream.lock().map(|s| !s.is_empty()).map_err(|_| poisoned())?;
            if non_empty {
                ids.push(id.clone());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use counterflow_events::Metadata;
    use serde_json::json;
    use std::thread;
    use uuid::Uuid;

    fn entity(id: &str) -> EntityId {
        EntityId::new(id).unwrap()
    }

    fn event(entity_id: &EntityId, n: i64) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            entity_id: entity_id.clone(),
            entity_type: "counter".to_string(),
            event_type: "value-increased".to_string(),
            event_version: 1,
            payload: json!({ "type": "value-increased", "value": n, "updatedValue": n }),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn sequence_numbers_start_at_one_without_gaps() {
        let store = InMemoryEventStore::new();
        let id = entity("a");

        let first = store
            .append(&id, vec![event(&id, 1), event(&id, 2)], ExpectedVersion::Exact(0))
            .unwrap();
        let second = store
            .append(&id, vec![event(&id, 3)], ExpectedVersion::Exact(2))
            .unwrap();

        let seqs: Vec<u64> = first.iter().chain(&second).map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(store.stream_version(&id).unwrap(), 3);
    }

    #[test]
    fn stale_expected_version_is_a_conflict() {
        let store = InMemoryEventStore::new();
        let id = entity("a");
        store.append(&id, vec![event(&id, 1)], ExpectedVersion::Exact(0)).unwrap();

        let err = store
            .append(&id, vec![event(&id, 2)], ExpectedVersion::Exact(0))
            .unwrap_err();

        assert!(matches!(err, EventStoreError::Concurrency(_)));
        assert_eq!(store.load_stream(&id).unwrap().len(), 1);
    }

    #[test]
    fn read_from_respects_offset_and_limit() {
        let store = InMemoryEventStore::new();
        let id = entity("a");
        let batch = (1..=5).map(|n| event(&id, n)).collect();
        store.append(&id, batch, ExpectedVersion::Any).unwrap();

        let page = store.read_from(&id, 2, Some(2)).unwrap();
        assert_eq!(page.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), vec![2, 3]);

        assert_eq!(store.read_from(&id, 0, None).unwrap().len(), 5);
        assert!(store.read_from(&id, 6, None).unwrap().is_empty());
        assert!(store.read_from(&entity("missing"), 1, None).unwrap().is_empty());
    }

    #[test]
    fn rejects_batches_for_other_entities() {
        let store = InMemoryEventStore::new();
        let a = entity("a");
        let b = entity("b");

        let err = store
            .append(&a, vec![event(&a, 1), event(&b, 2)], ExpectedVersion::Any)
            .unwrap_err();

        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
        assert!(store.entity_ids().unwrap().is_empty());
    }

    #[test]
    fn entity_type_is_stable_per_stream() {
        let store = InMemoryEventStore::new();
        let id = entity("a");
        store.append(&id, vec![event(&id, 1)], ExpectedVersion::Any).unwrap();

        let mut other = event(&id, 2);
        other.entity_type = "not-a-counter".to_string();
        let err = store.append(&id, vec![other], ExpectedVersion::Any).unwrap_err();

        assert!(matches!(err, EventStoreError::EntityTypeMismatch(_)));
    }

    #[test]
    fn concurrent_appends_to_one_entity_serialize() {
        let store = Arc::new(InMemoryEventStore::new());
        let id = entity("shared");

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let store = store.clone();
                let id = id.clone();
                thread::spawn(move || {
                    for i in 0..25 {
                        store
                            .append(&id, vec![event(&id, n * 100 + i)], ExpectedVersion::Any)
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stream = store.load_stream(&id).unwrap();
        assert_eq!(stream.len(), 200);
        for (idx, e) in stream.iter().enumerate() {
            assert_eq!(e.sequence_number, idx as u64 + 1);
        }
    }

    #[test]
    fn entity_ids_lists_non_empty_streams() {
        let store = InMemoryEventStore::new();
        let b = entity("b");
        let a = entity("a");
        store.append(&b, vec![event(&b, 1)], ExpectedVersion::Any).unwrap();
        store.append(&a, vec![event(&a, 1)], ExpectedVersion::Any).unwrap();

        assert_eq!(store.entity_ids().unwrap(), vec![a, b]);
    }
}
