//! Import runs and their resume cursor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::task::{ImportTask, TaskId, TaskStatus};

/// Unique identifier for an import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    Queued,
    Running,
    /// Every task is done.
    Completed,
    /// The cursor reached the end with at least one failed task.
    PartiallyFailed,
    /// Budget ran out; a continuation has been enqueued.
    TimedOutContinuing,
    /// Run state could not be read or written. Needs an operator restart.
    Aborted,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::PartiallyFailed => "partially-failed",
            Self::TimedOutContinuing => "timed-out-continuing",
            Self::Aborted => "aborted",
        }
    }

    /// No further continuation will move a finished run.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyFailed)
    }

    /// Still owned by a driver or a queued continuation.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Running | Self::TimedOutContinuing)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "partially-failed" => Ok(Self::PartiallyFailed),
            "timed-out-continuing" => Ok(Self::TimedOutContinuing),
            "aborted" => Ok(Self::Aborted),
            other => Err(format!("unknown run state: {other}")),
        }
    }
}

/// Resume point of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    /// Number of tasks already processed, in order. Only ever increases.
    pub position: u32,
    /// Last processed task.
    pub last_task: Option<TaskId>,
}

impl Cursor {
    pub fn after(position: u32, task: TaskId) -> Self {
        Self {
            position,
            last_task: Some(task),
        }
    }
}

/// One end-to-end import of a Drive folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRun {
    pub id: RunId,
    /// Target course, when the import binds a folder to an existing course.
    pub course_id: Option<String>,
    pub root_folder_id: String,
    pub root_name: String,
    pub state: RunState,
    pub tasks: Vec<ImportTask>,
    pub cursor: Cursor,
    pub requested_by: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportRun {
    pub fn new(
        root_folder_id: impl Into<String>,
        root_name: impl Into<String>,
        course_id: Option<String>,
        tasks: Vec<ImportTask>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::new(),
            course_id,
            root_folder_id: root_folder_id.into(),
            root_name: root_name.into(),
            state: RunState::Queued,
            tasks,
            cursor: Cursor::default(),
            requested_by: None,
            error: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn remaining(&self) -> usize {
        self.tasks.len().saturating_sub(self.cursor.position as usize)
    }

    pub fn failed_tasks(&self) -> impl Iterator<Item = &ImportTask> {
        self.tasks.iter().filter(|t| t.status == TaskStatus::Failed)
    }

    /// State to settle in once the cursor reaches the end.
    pub fn final_state(&self) -> RunState {
        if self.failed_tasks().next().is_some() {
            RunState::PartiallyFailed
        } else {
            RunState::Completed
        }
    }
}
