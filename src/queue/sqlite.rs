//! SQLite implementation of ContinuationQueue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::{ContinuationQueue, QueueEntryId, QueueError, QueuedContinuation};
use crate::payload::ImportRunnerPayload;
use crate::store::{format_ts, parse_ts};

fn storage_err(e: sqlx::Error) -> QueueError {
    QueueError::Storage(e.to_string())
}

/// SQLite-backed continuation queue.
#[derive(Clone)]
pub struct SqliteContinuationQueue {
    pool: SqlitePool,
}

impl SqliteContinuationQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the queue table.
    pub async fn run_migrations(&self) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS import_continuations (
                id INTEGER PRIMARY KEY,
                run_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                not_before TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_import_continuations_status
            ON import_continuations(status, id)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }
}

#[async_trait]
impl ContinuationQueue for SqliteContinuationQueue {
    async fn enqueue(&self, payload: &ImportRunnerPayload) -> Result<QueueEntryId, QueueError> {
        let body =
            serde_json::to_string(payload).map_err(|e| QueueError::Serialization(e.to_string()))?;

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO import_continuations (run_id, payload, created_at)
            VALUES (?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(payload.run_id().to_string())
        .bind(body)
        .bind(format_ts(Utc::now()))
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(QueueEntryId(id))
    }

    async fn claim(&self, limit: usize) -> Result<Vec<QueuedContinuation>, QueueError> {
        // No UPDATE ... LIMIT in stock SQLite; select then update in one tx.
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM import_continuations
            WHERE status = 'pending' AND (not_before IS NULL OR not_before <= ?)
            ORDER BY id
            LIMIT ?
            "#,
        )
        .bind(format_ts(Utc::now()))
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(storage_err)?;

        if ids.is_empty() {
            tx.commit().await.map_err(storage_err)?;
            return Ok(vec![]);
        }

        let in_clause = vec!["?"; ids.len()].join(",");

        let update = format!(
            "UPDATE import_continuations \
             SET status = 'running', attempts = attempts + 1, started_at = ? \
             WHERE id IN ({in_clause})"
        );
        let mut query = sqlx::query(&update).bind(format_ts(Utc::now()));
        for id in &ids {
            query = query.bind(id);
        }
        query.execute(&mut *tx).await.map_err(storage_err)?;

        let select = format!(
            "SELECT id, payload, created_at, attempts FROM import_continuations \
             WHERE id IN ({in_clause}) ORDER BY id"
        );
        let mut fetch = sqlx::query_as::<_, (i64, String, String, i64)>(&select);
        for id in &ids {
            fetch = fetch.bind(id);
        }
        let rows = fetch.fetch_all(&mut *tx).await.map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;

        rows.into_iter()
            .map(|(id, payload, created_at, attempts)| {
                let payload: ImportRunnerPayload = serde_json::from_str(&payload)
                    .map_err(|e| QueueError::Serialization(e.to_string()))?;
                let created_at =
                    parse_ts(&created_at).map_err(|e| QueueError::Serialization(e.to_string()))?;
                Ok(QueuedContinuation {
                    id: QueueEntryId(id),
                    payload,
                    created_at,
                    attempts: attempts as u32,
                })
            })
            .collect()
    }

    async fn complete(&self, id: QueueEntryId) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            UPDATE import_continuations
            SET status = 'completed', completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(format_ts(Utc::now()))
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    async fn fail(&self, id: QueueEntryId, error: &str) -> Result<(), QueueError> {
        let mut end = error.len().min(2000);
        while !error.is_char_boundary(end) {
            end -= 1;
        }

        sqlx::query(
            r#"
            UPDATE import_continuations
            SET status = 'failed', completed_at = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(format_ts(Utc::now()))
        .bind(&error[..end])
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    async fn defer(&self, id: QueueEntryId, until: DateTime<Utc>) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            UPDATE import_continuations
            SET status = 'pending', started_at = NULL, not_before = ?
            WHERE id = ?
            "#,
        )
        .bind(format_ts(until))
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    async fn recover_orphans(&self) -> Result<usize, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE import_continuations
            SET status = 'pending', started_at = NULL
            WHERE status = 'running'
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(result.rows_affected() as usize)
    }

    async fn pending_count(&self) -> Result<usize, QueueError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM import_continuations WHERE status IN ('pending', 'running')",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(count as usize)
    }
}
