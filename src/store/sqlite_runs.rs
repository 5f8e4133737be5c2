//! SQLite implementation of RunStore.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::time::Duration;

use super::{format_ts, parse_ts, storage_err, RunStore, StoreError};
use crate::run::{Cursor, ImportRun, RunId, RunState};
use crate::task::{ImportTask, TaskId};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS import_runs (
    id TEXT PRIMARY KEY,
    course_id TEXT,
    root_folder_id TEXT NOT NULL,
    root_name TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'queued',
    cursor_position INTEGER NOT NULL DEFAULT 0,
    cursor_task_id TEXT,
    requested_by TEXT,
    error_message TEXT,
    lock_owner TEXT,
    lock_expires_at TEXT,
    started_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS import_tasks (
    run_id TEXT NOT NULL REFERENCES import_runs(id),
    task_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    error_message TEXT,
    payload TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (run_id, task_id)
);

CREATE INDEX IF NOT EXISTS idx_import_runs_source ON import_runs(root_folder_id, course_id, started_at);
CREATE INDEX IF NOT EXISTS idx_import_tasks_seq ON import_tasks(run_id, seq);
CREATE INDEX IF NOT EXISTS idx_import_tasks_task ON import_tasks(task_id)
"#;

type RunRow = (
    String,
    Option<String>,
    String,
    String,
    String,
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
);

const RUN_COLUMNS: &str = "id, course_id, root_folder_id, root_name, state, cursor_position, \
     cursor_task_id, requested_by, error_message, started_at, updated_at";

/// SQLite-backed run store.
#[derive(Clone)]
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the run and task tables.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        for statement in SCHEMA.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(storage_err)?;
            }
        }
        Ok(())
    }

    async fn hydrate(&self, row: RunRow) -> Result<ImportRun, StoreError> {
        let (
            id,
            course_id,
            root_folder_id,
            root_name,
            state,
            cursor_position,
            cursor_task_id,
            requested_by,
            error,
            started_at,
            updated_at,
        ) = row;

        let payloads: Vec<String> =
            sqlx::query_scalar("SELECT payload FROM import_tasks WHERE run_id = ? ORDER BY seq")
                .bind(&id)
                .fetch_all(&self.pool)
                .await
                .map_err(storage_err)?;
        let tasks = payloads
            .iter()
            .map(|p| decode_task(p))
            .collect::<Result<Vec<_>, _>>()?;

        let last_task = cursor_task_id
            .map(|t| t.parse::<TaskId>())
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(ImportRun {
            id: id
                .parse()
                .map_err(|e: uuid::Error| StoreError::Serialization(e.to_string()))?,
            course_id,
            root_folder_id,
            root_name,
            state: state.parse().map_err(StoreError::Serialization)?,
            tasks,
            cursor: Cursor {
                position: cursor_position as u32,
                last_task,
            },
            requested_by,
            error,
            started_at: parse_ts(&started_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    }
}

fn decode_task(payload: &str) -> Result<ImportTask, StoreError> {
    serde_json::from_str(payload).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn encode_task(task: &ImportTask) -> Result<String, StoreError> {
    serde_json::to_string(task).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn create_run(&self, run: &ImportRun) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        sqlx::query(
            r#"
            INSERT INTO import_runs (id, course_id, root_folder_id, root_name, state,
                cursor_position, cursor_task_id, requested_by, error_message, started_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.to_string())
        .bind(&run.course_id)
        .bind(&run.root_folder_id)
        .bind(&run.root_name)
        .bind(run.state.as_str())
        .bind(run.cursor.position as i64)
        .bind(run.cursor.last_task.map(|t| t.to_string()))
        .bind(&run.requested_by)
        .bind(&run.error)
        .bind(format_ts(run.started_at))
        .bind(format_ts(run.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        for (seq, task) in run.tasks.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO import_tasks (run_id, task_id, seq, kind, status, error_message, payload, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(run.id.to_string())
            .bind(task.id.to_string())
            .bind(seq as i64)
            .bind(task.kind.as_str())
            .bind(task.status.as_str())
            .bind(&task.error)
            .bind(encode_task(task)?)
            .bind(format_ts(run.started_at))
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn load_run(&self, id: RunId) -> Result<Option<ImportRun>, StoreError> {
        let row: Option<RunRow> =
            sqlx::query_as(&format!("SELECT {RUN_COLUMNS} FROM import_runs WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_err)?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn latest_run_for_source(
        &self,
        root_folder_id: &str,
        course_id: Option<&str>,
    ) -> Result<Option<ImportRun>, StoreError> {
        let row: Option<RunRow> = sqlx::query_as(&format!(
            "SELECT {RUN_COLUMNS} FROM import_runs \
             WHERE root_folder_id = ? AND course_id IS ? \
             ORDER BY started_at DESC, rowid DESC LIMIT 1"
        ))
        .bind(root_folder_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn set_state(&self, id: RunId, state: RunState, error: Option<&str>) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE import_runs SET state = ?, error_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(state.as_str())
        .bind(error)
        .bind(format_ts(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("run {id}")));
        }
        Ok(())
    }

    async fn update_task(&self, run: RunId, task: &ImportTask) -> Result<(), StoreError> {
        let error = task.error.as_deref().map(truncate_error);
        let result = sqlx::query(
            r#"
            UPDATE import_tasks
            SET status = ?, error_message = ?, payload = ?, updated_at = ?
            WHERE run_id = ? AND task_id = ?
            "#,
        )
        .bind(task.status.as_str())
        .bind(error)
        .bind(encode_task(task)?)
        .bind(format_ts(Utc::now()))
        .bind(run.to_string())
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("task {} in run {run}", task.id)));
        }
        Ok(())
    }

    async fn advance_cursor(&self, run: RunId, expected: u32, next: Cursor) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE import_runs
            SET cursor_position = ?, cursor_task_id = ?, updated_at = ?
            WHERE id = ? AND cursor_position = ? AND ? > cursor_position
            "#,
        )
        .bind(next.position as i64)
        .bind(next.last_task.map(|t| t.to_string()))
        .bind(format_ts(Utc::now()))
        .bind(run.to_string())
        .bind(expected as i64)
        .bind(next.position as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn try_lock(&self, run: RunId, owner: &str, lease: Duration) -> Result<bool, StoreError> {
        let now = Utc::now();
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| StoreError::Storage(format!("invalid lease: {e}")))?;
        let result = sqlx::query(
            r#"
            UPDATE import_runs
            SET lock_owner = ?, lock_expires_at = ?
            WHERE id = ? AND (lock_owner IS NULL OR lock_owner = ? OR lock_expires_at < ?)
            "#,
        )
        .bind(owner)
        .bind(format_ts(now + lease))
        .bind(run.to_string())
        .bind(owner)
        .bind(format_ts(now))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_lock(&self, run: RunId, owner: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE import_runs SET lock_owner = NULL, lock_expires_at = NULL WHERE id = ? AND lock_owner = ?",
        )
        .bind(run.to_string())
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn find_task(&self, task: TaskId) -> Result<Option<(RunId, ImportTask)>, StoreError> {
        let row: Option<(String, String)> = sqlx::query_as(
            r#"
            SELECT t.run_id, t.payload
            FROM import_tasks t
            JOIN import_runs r ON r.id = t.run_id
            WHERE t.task_id = ?
            ORDER BY r.started_at DESC, r.rowid DESC
            LIMIT 1
            "#,
        )
        .bind(task.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.map(|(run_id, payload)| {
            let run_id = run_id
                .parse::<RunId>()
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            Ok((run_id, decode_task(&payload)?))
        })
        .transpose()
    }
}

fn truncate_error(error: &str) -> &str {
    const MAX: usize = 2000;
    if error.len() <= MAX {
        return error;
    }
    let mut end = MAX;
    while !error.is_char_boundary(end) {
        end -= 1;
    }
    &error[..end]
}
