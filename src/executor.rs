//! Executes one import task against Drive, object storage and the catalog.

use anyhow::anyhow;
use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::classify::{extension, file_stem, split_code};
use crate::config::ImportConfig;
use crate::drive::{is_google_native, mime, view_link, DriveClient, DriveError};
use crate::quiz::{csv_to_lines, parse_questions};
use crate::retry::{with_retry, Transient};
use crate::storage::{object_key, ByteStream, ObjectStore, StorageError};
use crate::store::{Catalog, FolderRecord, LessonKind, LessonRecord, StoreError, TestRecord};
use crate::task::{ImportTask, TaskKind, TaskOutcome};

/// Error from a single execution attempt.
#[derive(Error, Debug)]
pub enum ExecError {
    /// Transient failure, worth retrying.
    #[error("{0}")]
    Retryable(#[source] anyhow::Error),

    /// Will fail the same way on retry.
    #[error("{0}")]
    Permanent(#[source] anyhow::Error),
}

impl ExecError {
    pub fn retryable(err: impl Into<anyhow::Error>) -> Self {
        Self::Retryable(err.into())
    }

    pub fn permanent(err: impl Into<anyhow::Error>) -> Self {
        Self::Permanent(err.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

impl Transient for ExecError {
    fn is_transient(&self) -> bool {
        self.is_retryable()
    }
}

impl From<DriveError> for ExecError {
    fn from(err: DriveError) -> Self {
        if err.is_retryable() {
            Self::retryable(err)
        } else {
            Self::permanent(err)
        }
    }
}

impl From<StorageError> for ExecError {
    fn from(err: StorageError) -> Self {
        if err.is_transient() {
            Self::retryable(err)
        } else {
            Self::permanent(err)
        }
    }
}

impl From<StoreError> for ExecError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Storage(_) => Self::retryable(err),
            _ => Self::permanent(err),
        }
    }
}

/// Parent rows a task hangs off.
struct Parents {
    course_id: String,
    module_id: Option<String>,
}

/// Runs the side effects of a single task. Every write is an upsert, so
/// running the same task twice leaves the catalog unchanged.
pub struct ImportExecutor {
    drive: Arc<dyn DriveClient>,
    storage: Arc<dyn ObjectStore>,
    catalog: Arc<dyn Catalog>,
    config: ImportConfig,
}

impl ImportExecutor {
    pub fn new(
        drive: Arc<dyn DriveClient>,
        storage: Arc<dyn ObjectStore>,
        catalog: Arc<dyn Catalog>,
        config: ImportConfig,
    ) -> Self {
        Self {
            drive,
            storage,
            catalog,
            config,
        }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Execute `task`, retrying transient failures per the configured policy.
    ///
    /// `target_course` is the existing course a single-course import writes
    /// into. Without it, parents are found through the task's lineage.
    /// Never returns an error: failures come back as a failed outcome.
    pub async fn execute(&self, task: &ImportTask, target_course: Option<&str>) -> TaskOutcome {
        let (result, attempts) = with_retry(&self.config.retry, &task.path, || {
            self.attempt(task, target_course)
        })
        .await;

        match result {
            Ok(entity_id) => {
                debug!(task = %task.id, kind = task.kind.as_str(), attempts, "task done");
                TaskOutcome::done(entity_id, attempts)
            }
            Err(e) => {
                warn!(task = %task.id, path = %task.path, attempts, error = %e, "task failed");
                TaskOutcome::failed(format!("{}: {e}", task.path), attempts)
            }
        }
    }

    async fn attempt(
        &self,
        task: &ImportTask,
        target_course: Option<&str>,
    ) -> Result<Option<String>, ExecError> {
        match task.kind {
            TaskKind::Course => self.import_course(task, target_course).await.map(Some),
            TaskKind::Module => self.import_module(task, target_course).await.map(Some),
            TaskKind::LessonVideo => self
                .import_media(task, target_course, LessonKind::Video)
                .await
                .map(Some),
            TaskKind::LessonDocument => self
                .import_media(task, target_course, LessonKind::Document)
                .await
                .map(Some),
            TaskKind::Quiz => self.import_quiz(task, target_course).await.map(Some),
            TaskKind::Skip => Ok(None),
        }
    }

    fn folder_record(task: &ImportTask) -> FolderRecord {
        let (code, title) = split_code(&task.name);
        FolderRecord {
            source_id: task.source.id.clone(),
            revision: task.source.revision.clone(),
            title,
            code,
            position: task.position,
        }
    }

    async fn import_course(
        &self,
        task: &ImportTask,
        target_course: Option<&str>,
    ) -> Result<String, ExecError> {
        let record = Self::folder_record(task);
        let id = match target_course {
            Some(course_id) => self.catalog.bind_course(course_id, &record).await?,
            None => self.catalog.upsert_course(&record).await?,
        };
        info!(course_id = %id, title = %record.title, "course imported");
        Ok(id)
    }

    async fn import_module(
        &self,
        task: &ImportTask,
        target_course: Option<&str>,
    ) -> Result<String, ExecError> {
        let course_id = self.course_for(task, target_course).await?;
        let record = Self::folder_record(task);
        let id = self.catalog.upsert_module(&course_id, &record).await?;
        info!(module_id = %id, course_id = %course_id, title = %record.title, "module imported");
        Ok(id)
    }

    async fn course_for(
        &self,
        task: &ImportTask,
        target_course: Option<&str>,
    ) -> Result<String, ExecError> {
        if let Some(course_id) = target_course {
            return Ok(course_id.to_string());
        }
        let source = task
            .lineage
            .course_source
            .as_deref()
            .ok_or_else(|| ExecError::permanent(anyhow!("task has no parent course")))?;
        self.catalog
            .find_course_by_source(source)
            .await?
            .ok_or_else(|| ExecError::permanent(anyhow!("parent course {source} has not been imported")))
    }

    async fn parents_for(
        &self,
        task: &ImportTask,
        target_course: Option<&str>,
    ) -> Result<Parents, ExecError> {
        let course_id = self.course_for(task, target_course).await?;
        let module_id = match task.lineage.module_source.as_deref() {
            Some(source) => Some(
                self.catalog
                    .find_module_by_source(&course_id, source)
                    .await?
                    .ok_or_else(|| {
                        ExecError::permanent(anyhow!("parent module {source} has not been imported"))
                    })?,
            ),
            None => None,
        };
        Ok(Parents {
            course_id,
            module_id,
        })
    }

    fn lesson_record(task: &ImportTask, parents: Parents, kind: LessonKind) -> LessonRecord {
        let (code, title) = split_code(file_stem(&task.name));
        LessonRecord {
            course_id: parents.course_id,
            module_id: parents.module_id,
            source_id: task.source.id.clone(),
            revision: task.source.revision.clone(),
            title,
            code,
            kind,
            position: task.position,
            storage_key: None,
            storage_location: None,
            content_type: None,
            size: task.size,
            drive_link: Some(
                task.web_view_link
                    .clone()
                    .unwrap_or_else(|| view_link(&task.source.id)),
            ),
        }
    }

    /// Stream a video or document into object storage and upsert its lesson.
    async fn import_media(
        &self,
        task: &ImportTask,
        target_course: Option<&str>,
        kind: LessonKind,
    ) -> Result<String, ExecError> {
        let parents = self.parents_for(task, target_course).await?;

        // Docs and Slides have no binary form; store them as PDF.
        let (body, content_type, file_name) = if is_google_native(&task.mime_type) {
            let body = self.drive.export(&task.source.id, mime::PDF).await?;
            (body, mime::PDF.to_string(), format!("{}.pdf", task.name))
        } else {
            let body = self.drive.download(&task.source.id).await?;
            let content_type = if task.mime_type.is_empty() {
                mime::OCTET_STREAM.to_string()
            } else {
                task.mime_type.clone()
            };
            (body, content_type, task.name.clone())
        };

        let key = object_key(
            &parents.course_id,
            parents.module_id.as_deref(),
            &task.source.id,
            &file_name,
        );
        let stored = self.storage.put_stream(&key, &content_type, body).await?;

        let mut record = Self::lesson_record(task, parents, kind);
        record.storage_key = Some(stored.key);
        record.storage_location = Some(stored.location);
        record.content_type = Some(content_type);
        record.size = Some(stored.size);

        let id = self.catalog.upsert_lesson(&record).await?;
        info!(lesson_id = %id, kind = kind.as_str(), size = stored.size, "lesson imported");
        Ok(id)
    }

    /// Parse a quiz file into a test with questions.
    async fn import_quiz(
        &self,
        task: &ImportTask,
        target_course: Option<&str>,
    ) -> Result<String, ExecError> {
        let parents = self.parents_for(task, target_course).await?;
        let text = self.quiz_text(task).await?;

        let questions = parse_questions(&text);
        if questions.is_empty() {
            return Err(ExecError::permanent(anyhow!("no questions found in quiz file")));
        }

        let record = Self::lesson_record(task, parents, LessonKind::Quiz);
        let title = record.title.clone();
        let lesson_id = self.catalog.upsert_lesson(&record).await?;

        let defaults = &self.config.test_defaults;
        let test_id = self
            .catalog
            .upsert_test(
                &lesson_id,
                &TestRecord {
                    title,
                    duration_minutes: defaults.duration_minutes,
                    passing_score: defaults.passing_score,
                    max_attempts: defaults.max_attempts,
                },
            )
            .await?;
        let stored = self.catalog.replace_questions(&test_id, &questions).await?;

        info!(lesson_id = %lesson_id, test_id = %test_id, questions = stored, "quiz imported");
        Ok(lesson_id)
    }

    async fn quiz_text(&self, task: &ImportTask) -> Result<String, ExecError> {
        let id = &task.source.id;
        let is_csv = task.mime_type == mime::CSV || extension(&task.name).as_deref() == Some("csv");

        let (body, csv) = match task.mime_type.as_str() {
            mime::GOOGLE_SHEET => (self.drive.export(id, mime::CSV).await?, true),
            mime::GOOGLE_DOC => (self.drive.export(id, mime::TEXT).await?, false),
            other if is_google_native(other) => {
                return Err(ExecError::permanent(anyhow!(
                    "cannot read quiz from {other}"
                )));
            }
            _ => (self.drive.download(id).await?, is_csv),
        };

        let bytes = read_limited(body, self.config.max_quiz_bytes).await?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(if csv {
            csv_to_lines(&text)
        } else {
            text.into_owned()
        })
    }
}

async fn read_limited(mut body: ByteStream, limit: usize) -> Result<Vec<u8>, ExecError> {
    let mut buf = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(ExecError::retryable)?;
        if buf.len() + chunk.len() > limit {
            return Err(ExecError::permanent(anyhow!(
                "quiz file is larger than {limit} bytes"
            )));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}
