//! SQLite implementation of Catalog.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{
    format_ts, storage_err, Catalog, CatalogCounts, FolderRecord, LessonRecord, StoreError,
    TestRecord,
};
use crate::quiz::ParsedQuestion;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS courses (
    id TEXT PRIMARY KEY,
    source_id TEXT UNIQUE,
    source_revision TEXT,
    title TEXT NOT NULL,
    code TEXT,
    position INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS modules (
    id TEXT PRIMARY KEY,
    course_id TEXT NOT NULL REFERENCES courses(id),
    source_id TEXT NOT NULL,
    source_revision TEXT,
    title TEXT NOT NULL,
    code TEXT,
    position INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (course_id, source_id)
);

CREATE TABLE IF NOT EXISTS lessons (
    id TEXT PRIMARY KEY,
    parent_id TEXT NOT NULL,
    course_id TEXT NOT NULL REFERENCES courses(id),
    module_id TEXT REFERENCES modules(id),
    source_id TEXT NOT NULL,
    source_revision TEXT,
    kind TEXT NOT NULL,
    title TEXT NOT NULL,
    code TEXT,
    position INTEGER NOT NULL DEFAULT 0,
    storage_key TEXT,
    storage_location TEXT,
    content_type TEXT,
    size INTEGER,
    drive_link TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (parent_id, source_id)
);

CREATE TABLE IF NOT EXISTS tests (
    id TEXT PRIMARY KEY,
    lesson_id TEXT NOT NULL UNIQUE REFERENCES lessons(id),
    title TEXT NOT NULL,
    duration_minutes INTEGER NOT NULL,
    passing_score INTEGER NOT NULL,
    max_attempts INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS questions (
    id TEXT PRIMARY KEY,
    test_id TEXT NOT NULL REFERENCES tests(id),
    order_index INTEGER NOT NULL,
    kind TEXT NOT NULL,
    prompt TEXT NOT NULL,
    options TEXT NOT NULL,
    correct_answer TEXT,
    points INTEGER NOT NULL DEFAULT 1,
    UNIQUE (test_id, order_index)
);

CREATE INDEX IF NOT EXISTS idx_lessons_course ON lessons(course_id, position)
"#;

/// SQLite-backed course catalog.
#[derive(Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

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

    /// Create a course that is not tied to any Drive folder yet.
    pub async fn create_course(&self, title: &str) -> Result<String, StoreError> {
        let now = format_ts(Utc::now());
        let id: String = sqlx::query_scalar(
            "INSERT INTO courses (id, title, created_at, updated_at) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(title)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(id)
    }

    /// Titles of the lessons under a course, in position order.
    pub async fn lesson_titles(&self, course_id: &str) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar(
            "SELECT title FROM lessons WHERE course_id = ? ORDER BY module_id, position",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn course_exists(&self, course_id: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM courses WHERE id = ?")
            .bind(course_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(found.is_some())
    }

    async fn upsert_course(&self, record: &FolderRecord) -> Result<String, StoreError> {
        let now = format_ts(Utc::now());
        sqlx::query_scalar(
            r#"
            INSERT INTO courses (id, source_id, source_revision, title, code, position, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_id) DO UPDATE SET
                source_revision = excluded.source_revision,
                title = excluded.title,
                code = excluded.code,
                position = excluded.position,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&record.source_id)
        .bind(&record.revision)
        .bind(&record.title)
        .bind(&record.code)
        .bind(record.position as i64)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)
    }

    async fn bind_course(&self, course_id: &str, record: &FolderRecord) -> Result<String, StoreError> {
        let id: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE courses
            SET source_id = ?, source_revision = ?, updated_at = ?
            WHERE id = ?
            RETURNING id
            "#,
        )
        .bind(&record.source_id)
        .bind(&record.revision)
        .bind(format_ts(Utc::now()))
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        id.ok_or_else(|| StoreError::NotFound(format!("course {course_id}")))
    }

    async fn upsert_module(&self, course_id: &str, record: &FolderRecord) -> Result<String, StoreError> {
        let now = format_ts(Utc::now());
        sqlx::query_scalar(
            r#"
            INSERT INTO modules (id, course_id, source_id, source_revision, title, code, position, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(course_id, source_id) DO UPDATE SET
                source_revision = excluded.source_revision,
                title = excluded.title,
                code = excluded.code,
                position = excluded.position,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(course_id)
        .bind(&record.source_id)
        .bind(&record.revision)
        .bind(&record.title)
        .bind(&record.code)
        .bind(record.position as i64)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)
    }

    async fn upsert_lesson(&self, record: &LessonRecord) -> Result<String, StoreError> {
        let now = format_ts(Utc::now());
        sqlx::query_scalar(
            r#"
            INSERT INTO lessons (id, parent_id, course_id, module_id, source_id, source_revision, kind,
                title, code, position, storage_key, storage_location, content_type, size, drive_link,
                created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(parent_id, source_id) DO UPDATE SET
                source_revision = excluded.source_revision,
                kind = excluded.kind,
                title = excluded.title,
                code = excluded.code,
                position = excluded.position,
                storage_key = excluded.storage_key,
                storage_location = excluded.storage_location,
                content_type = excluded.content_type,
                size = excluded.size,
                drive_link = excluded.drive_link,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(record.parent_id())
        .bind(&record.course_id)
        .bind(&record.module_id)
        .bind(&record.source_id)
        .bind(&record.revision)
        .bind(record.kind.as_str())
        .bind(&record.title)
        .bind(&record.code)
        .bind(record.position as i64)
        .bind(&record.storage_key)
        .bind(&record.storage_location)
        .bind(&record.content_type)
        .bind(record.size.map(|s| s as i64))
        .bind(&record.drive_link)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)
    }

    async fn upsert_test(&self, lesson_id: &str, record: &TestRecord) -> Result<String, StoreError> {
        let now = format_ts(Utc::now());
        sqlx::query_scalar(
            r#"
            INSERT INTO tests (id, lesson_id, title, duration_minutes, passing_score, max_attempts, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(lesson_id) DO UPDATE SET
                title = excluded.title,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(lesson_id)
        .bind(&record.title)
        .bind(record.duration_minutes as i64)
        .bind(record.passing_score as i64)
        .bind(record.max_attempts as i64)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)
    }

    async fn replace_questions(
        &self,
        test_id: &str,
        questions: &[ParsedQuestion],
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        for (index, question) in questions.iter().enumerate() {
            let options = serde_json::to_string(&question.options)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO questions (id, test_id, order_index, kind, prompt, options, correct_answer, points)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(test_id, order_index) DO UPDATE SET
                    kind = excluded.kind,
                    prompt = excluded.prompt,
                    options = excluded.options,
                    correct_answer = excluded.correct_answer,
                    points = excluded.points
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(test_id)
            .bind(index as i64)
            .bind(question.kind.as_str())
            .bind(&question.prompt)
            .bind(options)
            .bind(&question.correct_answer)
            .bind(question.points as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        sqlx::query("DELETE FROM questions WHERE test_id = ? AND order_index >= ?")
            .bind(test_id)
            .bind(questions.len() as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(questions.len())
    }

    async fn find_course_by_source(&self, source_id: &str) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar("SELECT id FROM courses WHERE source_id = ?")
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)
    }

    async fn find_module_by_source(
        &self,
        course_id: &str,
        source_id: &str,
    ) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar("SELECT id FROM modules WHERE course_id = ? AND source_id = ?")
            .bind(course_id)
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)
    }

    async fn counts(&self) -> Result<CatalogCounts, StoreError> {
        let (courses, modules, lessons, tests, questions): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM courses),
                    (SELECT COUNT(*) FROM modules),
                    (SELECT COUNT(*) FROM lessons),
                    (SELECT COUNT(*) FROM tests),
                    (SELECT COUNT(*) FROM questions)
                "#,
            )
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(CatalogCounts {
            courses: courses as u64,
            modules: modules as u64,
            lessons: lessons as u64,
            tests: tests as u64,
            questions: questions as u64,
        })
    }
}
