//! Consumer cursor persistence.
//!
//! A cursor records the last sequence number a consumer has finished with on
//! one entity stream. It enables:
//! - resume after restart (delivery continues at `cursor + 1`)
//! - at-least-once redelivery (a failed event leaves the cursor where it was)
//! - rebuilds (clear a consumer's cursors and replay from 1)

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use counterflow_core::{ConsumerId, EntityId};

#[derive(Debug, Error)]
pub enum CursorStoreError {
    #[error("cursor store backend failure: {0}")]
    Backend(String),
}

/// Cursor store for (consumer, entity) positions.
pub trait ConsumerCursorStore: Send + Sync {
    /// Last finished sequence number (0 when nothing was delivered yet).
    fn get_cursor(&self, consumer_id: &ConsumerId, entity_id: &EntityId) -> Result<u64, CursorStoreError>;

    /// Move the cursor to `sequence_number`. Never moves it backwards.
    fn advance(
        &self,
        consumer_id: &ConsumerId,
        entity_id: &EntityId,
        sequence_number: u64,
    ) -> Result<(), CursorStoreError>;

    /// Forget every cursor of a consumer.
    fn clear(&self, consumer_id: &ConsumerId) -> Result<(), CursorStoreError>;
}

impl<C> ConsumerCursorStore for Arc<C>
where
    C: ConsumerCursorStore + ?Sized,
{
    fn get_cursor(&self, consumer_id: &ConsumerId, entity_id: &EntityId) -> Result<u64, CursorStoreError> {
        (**self).get_cursor(consumer_id, entity_id)
    }

    fn advance(
        &self,
        consumer_id: &ConsumerId,
        entity_id: &EntityId,
        sequence_number: u64,
    ) -> Result<(), CursorStoreError> {
        (**self).advance(consumer_id, entity_id, sequence_number)
    }

    fn clear(&self, consumer_id: &ConsumerId) -> Result<(), CursorStoreError> {
        (**self).clear(consumer_id)
    }
}

/// In-memory cursor store (process lifetime only).
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursors: RwLock<HashMap<(ConsumerId, EntityId), u64>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConsumerCursorStore for InMemoryCursorStore {
    fn get_cursor(&self, consumer_id: &ConsumerId, entity_id: &EntityId) -> Result<u64, CursorStoreError> {
        let cursors = self.cursors.read().unwrap_or_else(PoisonError::into_inner);
        Ok(cursors
            .get(&(consumer_id.clone(), entity_id.clone()))
            .copied()
            .unwrap_or(0))
    }

    fn advance(
        &self,
        consumer_id: &ConsumerId,
        entity_id: &EntityId,
        sequence_number: u64,
    ) -> Result<(), CursorStoreError> {
        let mut cursors = self.cursors.write().unwrap_or_else(PoisonError::into_inner);
        let cursor = cursors
            .entry((consumer_id.clone(), entity_id.clone()))
            .or_insert(0);
        *cursor = (*cursor).max(sequence_number);
        Ok(())
    }

    fn clear(&self, consumer_id: &ConsumerId) -> Result<(), CursorStoreError> {
        let mut cursors = self.cursors.write().unwrap_or_else(PoisonError::into_inner);
        cursors.retain(|(c, _), _| c != consumer_id);
        Ok(())
    }
}

/// Postgres-backed cursor store (`consumer_cursors` table,
/// `migrations/0002_consumer_cursors.sql`).
///
/// Shares the pool and runtime of the [`PostgresEventStore`] it was made
/// from, so cursors survive restarts alongside the log.
///
/// [`PostgresEventStore`]: crate::event_store::PostgresEventStore
#[cfg(feature = "postgres")]
#[derive(Debug, Clone)]
pub struct PostgresCursorStore {
    pool: sqlx::PgPool,
    runtime: Arc<tokio::runtime::Runtime>,
}

#[cfg(feature = "postgres")]
impl PostgresCursorStore {
    pub fn new(pool: sqlx::PgPool, runtime: Arc<tokio::runtime::Runtime>) -> Self {
        Self { pool, runtime }
    }
}

#[cfg(feature = "postgres")]
fn backend(operation: &str) -> impl FnOnce(sqlx::Error) -> CursorStoreError {
    move |e| CursorStoreError::Backend(format!("{operation}: {e}"))
}

#[cfg(feature = "postgres")]
impl ConsumerCursorStore for PostgresCursorStore {
    fn get_cursor(&self, consumer_id: &ConsumerId, entity_id: &EntityId) -> Result<u64, CursorStoreError> {
        let cursor: Option<i64> = self
            .runtime
            .block_on(
                sqlx::query_scalar::<_, i64>(
                    r#"
                    SELECT last_sequence_number
                    FROM consumer_cursors
                    WHERE consumer_id = $1 AND entity_id = $2
                    "#,
                )
                .bind(consumer_id.as_str())
                .bind(entity_id.as_str())
                .fetch_optional(&self.pool),
            )
            .map_err(backend("get_cursor"))?;
        Ok(cursor.map_or(0, |seq| seq as u64))
    }

    fn advance(
        &self,
        consumer_id: &ConsumerId,
        entity_id: &EntityId,
        sequence_number: u64,
    ) -> Result<(), CursorStoreError> {
        self.runtime
            .block_on(
                sqlx::query(
                    r#"
                    INSERT INTO consumer_cursors (consumer_id, entity_id, last_sequence_number)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (consumer_id, entity_id)
                    DO UPDATE SET
                        last_sequence_number = GREATEST(
                            consumer_cursors.last_sequence_number,
                            EXCLUDED.last_sequence_number
                        ),
                        updated_at = NOW()
                    "#,
                )
                .bind(consumer_id.as_str())
                .bind(entity_id.as_str())
                .bind(sequence_number as i64)
                .execute(&self.pool),
            )
            .map_err(backend("advance"))?;
        Ok(())
    }

    fn clear(&self, consumer_id: &ConsumerId) -> Result<(), CursorStoreError> {
        self.runtime
            .block_on(
                sqlx::query("DELETE FROM consumer_cursors WHERE consumer_id = $1")
                    .bind(consumer_id.as_str())
                    .execute(&self.pool),
            )
            .map_err(backend("clear"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consumer(s: &str) -> ConsumerId {
        ConsumerId::new(s).unwrap()
    }

    fn entity(s: &str) -> EntityId {
        EntityId::new(s).unwrap()
    }

    #[test]
    fn cursor_starts_at_zero_and_only_moves_forward() {
        let store = InMemoryCursorStore::new();
        let (c, e) = (consumer("a"), entity("x"));

        assert_eq!(store.get_cursor(&c, &e).unwrap(), 0);
        store.advance(&c, &e, 3).unwrap();
        store.advance(&c, &e, 2).unwrap();
        assert_eq!(store.get_cursor(&c, &e).unwrap(), 3);
    }

    #[test]
    fn cursors_are_independent_per_consumer_and_entity() {
        let store = InMemoryCursorStore::new();
        store.advance(&consumer("a"), &entity("x"), 5).unwrap();
        store.advance(&consumer("b"), &entity("x"), 1).unwrap();
        store.advance(&consumer("a"), &entity("y"), 2).unwrap();

        assert_eq!(store.get_cursor(&consumer("a"), &entity("x")).unwrap(), 5);
        assert_eq!(store.get_cursor(&consumer("b"), &entity("x")).unwrap(), 1);
        assert_eq!(store.get_cursor(&consumer("a"), &entity("y")).unwrap(), 2);
    }

    #[test]
    fn clear_only_touches_one_consumer() {
        let store = InMemoryCursorStore::new();
        store.advance(&consumer("a"), &entity("x"), 5).unwrap();
        store.advance(&consumer("b"), &entity("x"), 4).unwrap();

        store.clear(&consumer("a")).unwrap();

        assert_eq!(store.get_cursor(&consumer("a"), &entity("x")).unwrap(), 0);
        assert_eq!(store.get_cursor(&consumer("b"), &entity("x")).unwrap(), 4);
    }
}
