//! Continuation message passed between orchestrator invocations.

use constant_time_eq::constant_time_eq;
use serde::{Deserialize, Serialize};

use crate::run::{Cursor, RunId};

/// Versioned continuation token.
///
/// Serialized with a `version` tag so new fields can be added in a new
/// variant without breaking continuations already sitting in the queue.
///
/// ```json
/// {"version": "1", "runId": "…", "secret": "…", "cursor": {"position": 3, "lastTask": "…"}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum ImportRunnerPayload {
    #[serde(rename = "1")]
    V1 {
        #[serde(rename = "runId")]
        run_id: RunId,
        secret: String,
        cursor: Cursor,
    },
}

impl ImportRunnerPayload {
    pub fn new(run_id: RunId, secret: impl Into<String>, cursor: Cursor) -> Self {
        Self::V1 {
            run_id,
            secret: secret.into(),
            cursor,
        }
    }

    pub fn run_id(&self) -> RunId {
        match self {
            Self::V1 { run_id, .. } => *run_id,
        }
    }

    pub fn cursor(&self) -> Cursor {
        match self {
            Self::V1 { cursor, .. } => *cursor,
        }
    }

    /// Exact, constant-time comparison against the configured secret.
    pub fn verify(&self, expected: &str) -> bool {
        match self {
            Self::V1 { secret, .. } => {
                !expected.is_empty() && constant_time_eq(secret.as_bytes(), expected.as_bytes())
            }
        }
    }
}
