//! Persistence: run state and the course catalog.

#[cfg(feature = "sqlite")]
mod sqlite_catalog;
#[cfg(feature = "sqlite")]
mod sqlite_runs;

#[cfg(feature = "sqlite")]
pub use sqlite_catalog::SqliteCatalog;
#[cfg(feature = "sqlite")]
pub use sqlite_runs::SqliteRunStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::quiz::ParsedQuestion;
use crate::run::{Cursor, ImportRun, RunId, RunState};
use crate::task::{ImportTask, TaskId};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),
}

#[cfg(feature = "sqlite")]
pub(crate) fn storage_err(e: sqlx::Error) -> StoreError {
    StoreError::Storage(e.to_string())
}

/// Fixed-width UTC timestamps, so stored values also compare as text.
#[cfg(feature = "sqlite")]
pub(crate) fn format_ts(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[cfg(feature = "sqlite")]
pub(crate) fn parse_ts(raw: &str) -> Result<chrono::DateTime<chrono::Utc>, StoreError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp {raw}: {e}")))
}

/// Durable run state: per-task statuses plus the cursor.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persist a new run together with its task list.
    async fn create_run(&self, run: &ImportRun) -> Result<(), StoreError>;

    async fn load_run(&self, id: RunId) -> Result<Option<ImportRun>, StoreError>;

    /// Most recent run over the same folder and target course.
    async fn latest_run_for_source(
        &self,
        root_folder_id: &str,
        course_id: Option<&str>,
    ) -> Result<Option<ImportRun>, StoreError>;

    async fn set_state(&self, id: RunId, state: RunState, error: Option<&str>) -> Result<(), StoreError>;

    /// Write one task's status, error and result.
    async fn update_task(&self, run: RunId, task: &ImportTask) -> Result<(), StoreError>;

    /// Move the cursor only if it still sits at `expected`.
    /// Returns false when someone else moved it first.
    async fn advance_cursor(&self, run: RunId, expected: u32, next: Cursor) -> Result<bool, StoreError>;

    /// Take or renew the per-run lease. Returns false while another owner holds it.
    async fn try_lock(&self, run: RunId, owner: &str, lease: Duration) -> Result<bool, StoreError>;

    async fn release_lock(&self, run: RunId, owner: &str) -> Result<(), StoreError>;

    /// The latest run containing `task`, with the task as persisted there.
    async fn find_task(&self, task: TaskId) -> Result<Option<(RunId, ImportTask)>, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonKind {
    Video,
    Document,
    Quiz,
}

impl LessonKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Document => "document",
            Self::Quiz => "quiz",
        }
    }
}

/// Metadata shared by course and module upserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRecord {
    pub source_id: String,
    pub revision: Option<String>,
    pub title: String,
    pub code: Option<String>,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonRecord {
    pub course_id: String,
    pub module_id: Option<String>,
    pub source_id: String,
    pub revision: Option<String>,
    pub title: String,
    pub code: Option<String>,
    pub kind: LessonKind,
    pub position: u32,
    pub storage_key: Option<String>,
    pub storage_location: Option<String>,
    pub content_type: Option<String>,
    pub size: Option<u64>,
    pub drive_link: Option<String>,
}

impl LessonRecord {
    /// Lessons hang off their module, or off the course when they sit
    /// directly in the course folder.
    pub fn parent_id(&self) -> &str {
        self.module_id.as_deref().unwrap_or(&self.course_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRecord {
    pub title: String,
    pub duration_minutes: u32,
    pub passing_score: u32,
    pub max_attempts: u32,
}

/// Row counts, mostly for status pages and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogCounts {
    pub courses: u64,
    pub modules: u64,
    pub lessons: u64,
    pub tests: u64,
    pub questions: u64,
}

/// Course catalog rows written by the executor. Every write is an upsert
/// keyed by `(parent, source id)`, so executing a task twice never
/// duplicates rows.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn course_exists(&self, course_id: &str) -> Result<bool, StoreError>;

    /// Create or update a course keyed by its Drive folder.
    async fn upsert_course(&self, record: &FolderRecord) -> Result<String, StoreError>;

    /// Attach a Drive folder to an existing course. Keeps the course title.
    async fn bind_course(&self, course_id: &str, record: &FolderRecord) -> Result<String, StoreError>;

    async fn upsert_module(&self, course_id: &str, record: &FolderRecord) -> Result<String, StoreError>;

    async fn upsert_lesson(&self, record: &LessonRecord) -> Result<String, StoreError>;

    /// One test per quiz lesson.
    async fn upsert_test(&self, lesson_id: &str, record: &TestRecord) -> Result<String, StoreError>;

    /// Upsert questions by position and drop any left over from a longer
    /// previous version. Returns the number of questions stored.
    async fn replace_questions(
        &self,
        test_id: &str,
        questions: &[ParsedQuestion],
    ) -> Result<usize, StoreError>;

    async fn find_course_by_source(&self, source_id: &str) -> Result<Option<String>, StoreError>;

    async fn find_module_by_source(
        &self,
        course_id: &str,
        source_id: &str,
    ) -> Result<Option<String>, StoreError>;

    async fn counts(&self) -> Result<CatalogCounts, StoreError>;
}
