//! SQLite Stream Store
//!
//! Durable backend on sqlx. Records and tails live in two tables; the
//! conditional write runs in one transaction so a tail never points past the
//! last persisted record.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{InsertOutcome, StoreError, StreamStore};
use crate::ledger::hash::ChainHash;
use crate::ledger::payload::Payload;
use crate::ledger::record::{ChainTail, Record};
use crate::ledger::stream::StreamId;

const LEDGER_SCHEMA: &str = include_str!("../../migrations/001_ledger.sql");

/// How long a writer waits on another process's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Single-connection in-memory database. The connection is never recycled,
    /// since closing it would drop the data.
    pub async fn new_in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(LEDGER_SCHEMA).execute(&self.pool).await?;
        info!("Ledger schema ready");
        Ok(())
    }

    /// Raw pool access, bypassing the ledger.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_tail<'e, E>(executor: E, stream: &StreamId) -> Result<Option<ChainTail>, StoreError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query("SELECT last_sequence, last_hash FROM ledger_tails WHERE stream_id = ?")
            .bind(stream.as_str())
            .fetch_optional(executor)
            .await?;

        row.map(|row| {
            let sequence: i64 = row.try_get("last_sequence")?;
            let hash: String = row.try_get("last_hash")?;
            let corrupt = |reason: String| StoreError::Corrupt {
                stream: stream.to_string(),
                sequence: u64::try_from(sequence).ok(),
                reason,
            };
            Ok(ChainTail {
                sequence: u64::try_from(sequence)
                    .map_err(|_| corrupt(format!("negative tail sequence {}", sequence)))?,
                hash: hash
                    .parse()
                    .map_err(|e: crate::ledger::hash::ParseHashError| corrupt(e.to_string()))?,
            })
        })
        .transpose()
    }

    fn decode_record(row: &SqliteRow, stream: &StreamId) -> Result<Record, StoreError> {
        let sequence: i64 = row.try_get("sequence")?;
        let corrupt = |reason: String| StoreError::Corrupt {
            stream: stream.to_string(),
            sequence: u64::try_from(sequence).ok(),
            reason,
        };

        let stream_id: String = row.try_get("stream_id")?;
        let payload: String = row.try_get("payload")?;
        let created_at: String = row.try_get("created_at")?;
        let previous_hash: String = row.try_get("previous_hash")?;
        let record_hash: String = row.try_get("record_hash")?;
        let idempotency_key: Option<String> = row.try_get("idempotency_key")?;

        Ok(Record {
            stream_id: StreamId::new(stream_id).map_err(|e| corrupt(e.to_string()))?,
            sequence: u64::try_from(sequence)
                .map_err(|_| corrupt(format!("negative sequence {}", sequence)))?,
            payload: serde_json::from_str::<Payload>(&payload)
                .map_err(|e| corrupt(format!("payload: {}", e)))?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| corrupt(format!("created_at: {}", e)))?
                .with_timezone(&Utc),
            previous_hash: previous_hash
                .parse::<ChainHash>()
                .map_err(|e| corrupt(format!("previous_hash: {}", e)))?,
            record_hash: record_hash
                .parse::<ChainHash>()
                .map_err(|e| corrupt(format!("record_hash: {}", e)))?,
            idempotency_key,
        })
    }
}

fn to_db_sequence(sequence: u64) -> Result<i64, StoreError> {
    i64::try_from(sequence)
        .map_err(|_| StoreError::Unavailable(format!("sequence {} exceeds storage range", sequence)))
}

impl StreamStore for SqliteStore {
    async fn tail(&self, stream: &StreamId) -> Result<Option<ChainTail>, StoreError> {
        Self::fetch_tail(&self.pool, stream).await
    }

    async fn insert_if_tail(
        &self,
        record: &Record,
        expected: Option<&ChainTail>,
    ) -> Result<InsertOutcome, StoreError> {
        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| StoreError::Unavailable(format!("payload encoding: {}", e)))?;
        let sequence = to_db_sequence(record.sequence)?;
        let now = Utc::now().to_rfc3339();

        // Write lock up front; other processes wait out BUSY_TIMEOUT
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let current = Self::fetch_tail(&mut *tx, &record.stream_id).await?;
        if current.as_ref() != expected {
            tx.rollback().await?;
            debug!("Tail moved for stream '{}', rejecting write", record.stream_id);
            return Ok(InsertOutcome::Conflict);
        }

        // Record first
        let inserted = sqlx::query(
            r#"
            INSERT INTO ledger_records
                (stream_id, sequence, payload, created_at, previous_hash, record_hash, idempotency_key)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.stream_id.as_str())
        .bind(sequence)
        .bind(&payload)
        .bind(record.created_at.to_rfc3339())
        .bind(record.previous_hash.to_string())
        .bind(record.record_hash.to_string())
        .bind(record.idempotency_key.as_deref())
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                tx.rollback().await?;
                return Ok(InsertOutcome::Conflict);
            }
            Err(e) => return Err(e.into()),
        }

        // Then the tail, guarded by the value we read
        let advanced = match expected {
            None => sqlx::query(
                r#"
                INSERT INTO ledger_tails (stream_id, last_sequence, last_hash, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (stream_id) DO NOTHING
                "#,
            )
            .bind(record.stream_id.as_str())
            .bind(sequence)
            .bind(record.record_hash.to_string())
            .bind(&now)
            .execute(&mut *tx)
            .await?,
            Some(tail) => sqlx::query(
                r#"
                UPDATE ledger_tails
                SET last_sequence = ?, last_hash = ?, updated_at = ?
                WHERE stream_id = ? AND last_sequence = ? AND last_hash = ?
                "#,
            )
            .bind(sequence)
            .bind(record.record_hash.to_string())
            .bind(&now)
            .bind(record.stream_id.as_str())
            .bind(to_db_sequence(tail.sequence)?)
            .bind(tail.hash.to_string())
            .execute(&mut *tx)
            .await?,
        };

        if advanced.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(InsertOutcome::Conflict);
        }

        tx.commit().await?;
        Ok(InsertOutcome::Inserted)
    }

    async fn find_by_idempotency_key(
        &self,
        stream: &StreamId,
        key: &str,
    ) -> Result<Option<Record>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT stream_id, sequence, payload, created_at, previous_hash, record_hash, idempotency_key
            FROM ledger_records
            WHERE stream_id = ? AND idempotency_key = ?
            "#,
        )
        .bind(stream.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::decode_record(&row, stream)).transpose()
    }

    async fn range(&self, stream: &StreamId, from: u64, to: u64) -> Result<Vec<Record>, StoreError> {
        if from >= to {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT stream_id, sequence, payload, created_at, previous_hash, record_hash, idempotency_key
            FROM ledger_records
            WHERE stream_id = ? AND sequence >= ? AND sequence < ?
            ORDER BY sequence ASC, rowid ASC
            "#,
        )
        .bind(stream.as_str())
        .bind(i64::try_from(from).unwrap_or(i64::MAX))
        .bind(i64::try_from(to).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| Self::decode_record(row, stream)).collect()
    }

    async fn last_sequence(&self, stream: &StreamId) -> Result<Option<u64>, StoreError> {
        let row = sqlx::query("SELECT MAX(sequence) AS last FROM ledger_records WHERE stream_id = ?")
            .bind(stream.as_str())
            .fetch_one(&self.pool)
            .await?;
        let last: Option<i64> = row.try_get("last")?;
        last.map(|seq| {
            u64::try_from(seq).map_err(|_| StoreError::Corrupt {
                stream: stream.to_string(),
                sequence: None,
                reason: format!("negative sequence {}", seq),
            })
        })
        .transpose()
    }

    async fn streams(&self) -> Result<Vec<StreamId>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT stream_id FROM ledger_records
            UNION
            SELECT stream_id FROM ledger_tails
            ORDER BY stream_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut streams = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("stream_id")?;
            match StreamId::new(name.as_str()) {
                Ok(id) => streams.push(id),
                Err(e) => warn!("Ignoring stored stream with invalid id '{}': {}", name, e),
            }
        }
        Ok(streams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn setup() -> SqliteStore {
        let store = SqliteStore::new_in_memory().await.unwrap();
        store.run_migrations().await.unwrap();
        store
    }

    fn record(stream: &StreamId, tail: Option<&ChainTail>) -> Record {
        Record::chained(
            stream.clone(),
            Payload::from_json(&json!({"rule": "not_null", "passed": true, "ratio": 0.97})).unwrap(),
            tail,
            None,
        )
    }

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let store = setup().await;
        let stream = StreamId::new("quality-runs").unwrap();
        let first = record(&stream, None);

        assert_eq!(store.insert_if_tail(&first, None).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.tail(&stream).await.unwrap(), Some(first.tail()));

        let records = store.range(&stream, 0, 10).await.unwrap();
        assert_eq!(records, vec![first]);
        assert_eq!(store.streams().await.unwrap(), vec![stream]);
    }

    #[tokio::test]
    async fn test_stale_tail_conflicts() {
        let store = setup().await;
        let stream = StreamId::new("quality-runs").unwrap();
        let first = record(&stream, None);
        store.insert_if_tail(&first, None).await.unwrap();

        let stale = record(&stream, None);
        assert_eq!(store.insert_if_tail(&stale, None).await.unwrap(), InsertOutcome::Conflict);
        assert_eq!(store.range(&stream, 0, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let store = setup().await;
        store.run_migrations().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_reported_with_sequence() {
        let store = setup().await;
        let stream = StreamId::new("quality-runs").unwrap();
        let first = record(&stream, None);
        store.insert_if_tail(&first, None).await.unwrap();

        sqlx::query("UPDATE ledger_records SET payload = 'not json' WHERE sequence = 0")
            .execute(store.pool())
            .await
            .unwrap();

        match store.range(&stream, 0, 10).await {
            Err(StoreError::Corrupt { sequence, .. }) => assert_eq!(sequence, Some(0)),
            other => panic!("expected corrupt record, got {:?}", other),
        }
    }
}
