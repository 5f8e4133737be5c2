//! Import tasks: one unit of work per Drive file or folder.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stable identifier of a task, derived from the Drive path of its node.
///
/// Listing the same tree twice yields the same ids, which is what lets a
/// new run pick up the statuses recorded by an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    const NAMESPACE: Uuid = Uuid::from_u128(0x6b1f_0c5e_93d2_4a8e_b1f4_52a7_e0c9_d318);

    /// Derive the id from the Drive ids on the path from the import root.
    pub fn from_path<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = segments
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect::<Vec<_>>()
            .join("/");
        Self(Uuid::new_v5(&Self::NAMESPACE, joined.as_bytes()))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Role of a node in the imported course structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Course,
    Module,
    LessonVideo,
    LessonDocument,
    Quiz,
    Skip,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Course => "course",
            Self::Module => "module",
            Self::LessonVideo => "lesson-video",
            Self::LessonDocument => "lesson-document",
            Self::Quiz => "quiz",
            Self::Skip => "skip",
        }
    }

    /// Course and module tasks own the tasks listed below them.
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Course | Self::Module)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in-progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Handle to the Drive node behind a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub id: String,
    /// Drive `modifiedTime` at listing time.
    pub revision: Option<String>,
}

/// Drive ids of the course and module folders above a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lineage {
    pub course_source: Option<String>,
    pub module_source: Option<String>,
}

/// One unit of work within an import run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportTask {
    pub id: TaskId,
    pub kind: TaskKind,
    pub name: String,
    pub mime_type: String,
    /// Human readable path from the import root, e.g. `Course A/Module 1/video1.mp4`.
    pub path: String,
    pub depth: u32,
    /// Index among siblings, in listing order.
    pub position: u32,
    pub source: SourceRef,
    pub parent: Option<TaskId>,
    #[serde(default)]
    pub lineage: Lineage,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub web_view_link: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub error: Option<String>,
    /// Catalog row written by the task once it is done.
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub attempts: u32,
}

impl ImportTask {
    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }

    pub fn mark_in_progress(&mut self) {
        self.status = TaskStatus::InProgress;
        self.error = None;
    }

    pub fn mark_done(&mut self, entity_id: Option<String>) {
        self.status = TaskStatus::Done;
        self.error = None;
        if entity_id.is_some() {
            self.entity_id = entity_id;
        }
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
    }

    /// Apply the result of one executor invocation.
    pub fn apply(&mut self, outcome: &TaskOutcome) {
        self.attempts += outcome.attempts;
        match outcome.status {
            TaskStatus::Done => self.mark_done(outcome.entity_id.clone()),
            _ => self.mark_failed(
                outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "task failed".to_string()),
            ),
        }
    }
}

/// Result of executing one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub entity_id: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
}

impl TaskOutcome {
    pub fn done(entity_id: Option<String>, attempts: u32) -> Self {
        Self {
            status: TaskStatus::Done,
            entity_id,
            error: None,
            attempts,
        }
    }

    pub fn failed(error: impl Into<String>, attempts: u32) -> Self {
        Self {
            status: TaskStatus::Failed,
            entity_id: None,
            error: Some(error.into()),
            attempts,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }
}
