//! Postgres-backed event log.
//!
//! Schema: `migrations/0001_events.sql` (cursors: `0002_consumer_cursors.sql`).
//!
//! ## Error mapping
//!
//! | SQLx error | Postgres code | `EventStoreError` |
//! |---|---|---|
//! | unique violation | `23505` | `Concurrency` (another writer took the sequence number) |
//! | check violation | `23514` | `InvalidAppend` |
//! | anything else | | `Backend` |
//!
//! ## Threading
//!
//! The [`EventStore`] trait is synchronous. The store owns a Tokio runtime and
//! blocks on it, so it must be called from plain threads (the workers and
//! command callers in this workspace), never from inside an async task.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::instrument;

use counterflow_core::{EntityId, ExpectedVersion};
use counterflow_events::Metadata;

use crate::consumers::PostgresCursorStore;

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent, validate_batch};

/// Postgres-backed append-only event log.
///
/// Appends run in a transaction that first takes a per-entity advisory lock,
/// so writers of one entity serialize while other entities proceed. The
/// unique `(entity_id, sequence_number)` constraint backs this up.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    runtime: Arc<tokio::runtime::Runtime>,
}

impl PostgresEventStore {
    /// Connect to `database_url` on a dedicated runtime.
    pub fn connect(database_url: &str, max_connections: u32) -> Result<Self, EventStoreError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .thread_name("counterflow-pg")
            .build()
            .map_err(|e| EventStoreError::Backend(format!("failed to start runtime: {e}")))?;

        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .connect(database_url),
            )
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self {
            pool,
            runtime: Arc::new(runtime),
        })
    }

    /// Consumer cursors kept in the same database, on the same pool.
    pub fn cursor_store(&self) -> PostgresCursorStore {
        PostgresCursorStore::new(self.pool.clone(), self.runtime.clone())
    }

    #[instrument(skip(self, events), fields(entity_id = %entity_id, event_count = events.len()), err)]
    async fn append_events(
        &self,
        entity_id: &EntityId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let entity_type = validate_batch(entity_id, &events)?.to_string();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(entity_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("advisory_lock", e))?;

        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(MAX(sequence_number), 0) AS version,
                MIN(entity_type) AS entity_type
            FROM events
            WHERE entity_id = $1
            "#,
        )
        .bind(entity_id.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("stream_version", e))?;

        let current: i64 = row
            .try_get("version")
            .map_err(|e| map_sqlx_error("stream_version", e))?;
        let current = current as u64;
        let existing_type: Option<String> = row
            .try_get("entity_type")
            .map_err(|e| map_sqlx_error("stream_version", e))?;

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }
        if let Some(existing) = existing_type {
            if existing != entity_type {
                return Err(EventStoreError::EntityTypeMismatch(format!(
                    "stream entity_type is '{existing}', attempted append with '{entity_type}'"
                )));
            }
        }

        let mut committed = Vec::with_capacity(events.len());
        let mut next = current + 1;
        for event in events {
            let appended_at: DateTime<Utc> = sqlx::query(
                r#"
                INSERT INTO events (
                    event_id,
                    entity_id,
                    entity_type,
                    sequence_number,
                    event_type,
                    event_version,
                    payload,
                    metadata
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING appended_at
                "#,
            )
            .bind(event.event_id)
            .bind(entity_id.as_str())
            .bind(&event.entity_type)
            .bind(next as i64)
            .bind(&event.event_type)
            .bind(event.event_version as i32)
            .bind(&event.payload)
            .bind(Json(&event.metadata))
            .fetch_one(&mut *tx)
            .await
            .and_then(|row| row.try_get("appended_at"))
            .map_err(|e| {
                if is_unique_violation(&e) {
                    EventStoreError::Concurrency(format!(
                        "concurrent append detected: sequence_number {next} already exists"
                    ))
                } else {
                    map_sqlx_error("insert_event", e)
                }
            })?;

            committed.push(StoredEvent {
                event_id: event.event_id,
                entity_id: event.entity_id,
                entity_type: event.entity_type,
                sequence_number: next,
                event_type: event.event_type,
                event_version: event.event_version,
                appended_at,
                payload: event.payload,
                metadata: event.metadata,
            });
            next += 1;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(committed)
    }

    async fn read_events(
        &self,
        entity_id: &EntityId,
        from_sequence: u64,
        limit: Option<usize>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let limit = limit.map(|l| l as i64).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                entity_id,
                entity_type,
                sequence_number,
                event_type,
                event_version,
                appended_at,
                payload,
                metadata
            FROM events
            WHERE entity_id = $1 AND sequence_number >= $2
            ORDER BY sequence_number ASC
            LIMIT $3
            "#,
        )
        .bind(entity_id.as_str())
        .bind(from_sequence.max(1) as i64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("read_from", e))?;

        rows.iter().map(stored_event_from_row).collect()
    }

    async fn max_sequence(&self, entity_id: &EntityId) -> Result<u64, EventStoreError> {
        let version: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence_number), 0) FROM events WHERE entity_id = $1",
        )
        .bind(entity_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("stream_version", e))?;
        Ok(version as u64)
    }

    async fn distinct_entities(&self) -> Result<Vec<EntityId>, EventStoreError> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT entity_id FROM events ORDER BY entity_id")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("entity_ids", e))?;

        ids.into_iter()
            .map(|id| {
                EntityId::new(id).map_err(|e| EventStoreError::Backend(format!("bad entity_id row: {e}")))
            })
            .collect()
    }
}

fn stored_event_from_row(row: &PgRow) -> Result<StoredEvent, EventStoreError> {
    let decode = |e: sqlx::Error| EventStoreError::Backend(format!("failed to decode event row: {e}"));

    let entity_id: String = row.try_get("entity_id").map_err(decode)?;
    let sequence_number: i64 = row.try_get("sequence_number").map_err(decode)?;
    let event_version: i32 = row.try_get("event_version").map_err(decode)?;
    let metadata: Json<Metadata> = row.try_get("metadata").map_err(decode)?;

    Ok(StoredEvent {
        event_id: row.try_get("event_id").map_err(decode)?,
        entity_id: EntityId::new(entity_id)
            .map_err(|e| EventStoreError::Backend(format!("bad entity_id row: {e}")))?,
        entity_type: row.try_get("entity_type").map_err(decode)?,
        sequence_number: sequence_number as u64,
        event_type: row.try_get("event_type").map_err(decode)?,
        event_version: event_version as u32,
        appended_at: row.try_get("appended_at").map_err(decode)?,
        payload: row.try_get("payload").map_err(decode)?,
        metadata: metadata.0,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505")
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    let check_violation = err
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23514");
    if check_violation {
        EventStoreError::InvalidAppend(format!("{operation}: {err}"))
    } else {
        EventStoreError::Backend(format!("{operation}: {err}"))
    }
}

impl EventStore for PostgresEventStore {
    fn append(
        &self,
        entity_id: &EntityId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }
        self.runtime
            .block_on(self.append_events(entity_id, events, expected_version))
    }

    fn read_from(
        &self,
        entity_id: &EntityId,
        from_sequence: u64,
        limit: Option<usize>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.runtime
            .block_on(self.read_events(entity_id, from_sequence, limit))
    }

    fn stream_version(&self, entity_id: &EntityId) -> Result<u64, EventStoreError> {
        self.runtime.block_on(self.max_sequence(entity_id))
    }

    fn entity_ids(&self) -> Result<Vec<EntityId>, EventStoreError> {
        self.runtime.block_on(self.distinct_entities())
    }
}
