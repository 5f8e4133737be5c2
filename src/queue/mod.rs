//! Durable queue of continuation payloads.
//!
//! When a run exhausts its time budget the orchestrator enqueues a
//! [`ImportRunnerPayload`] here. A [`ContinuationWorker`] claims entries and
//! hands them back to the orchestrator, so a long import is carried across
//! many short invocations without anyone holding a request open.

#[cfg(feature = "sqlite")]
mod sqlite;
mod worker;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteContinuationQueue;
pub use worker::{ContinuationHandler, ContinuationWorker, ContinuationWorkerBuilder, Handled};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

use crate::payload::ImportRunnerPayload;

/// Identifier of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueEntryId(pub i64);

impl fmt::Display for QueueEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A continuation claimed from the queue.
#[derive(Debug, Clone)]
pub struct QueuedContinuation {
    pub id: QueueEntryId,
    pub payload: ImportRunnerPayload,
    pub created_at: DateTime<Utc>,
    /// How many times this entry has been claimed, this claim included.
    pub attempts: u32,
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("handler error: {0}")]
    Handler(String),
}

#[async_trait]
pub trait ContinuationQueue: Send + Sync {
    async fn enqueue(&self, payload: &ImportRunnerPayload) -> Result<QueueEntryId, QueueError>;

    /// Claim up to `limit` pending entries atomically, oldest first.
    async fn claim(&self, limit: usize) -> Result<Vec<QueuedContinuation>, QueueError>;

    async fn complete(&self, id: QueueEntryId) -> Result<(), QueueError>;

    async fn fail(&self, id: QueueEntryId, error: &str) -> Result<(), QueueError>;

    /// Hand a claimed entry back to "pending", not claimable before `until`.
    async fn defer(&self, id: QueueEntryId, until: DateTime<Utc>) -> Result<(), QueueError>;

    /// Put entries stuck in "running" back to "pending". Call on startup.
    /// Returns the number of entries recovered.
    async fn recover_orphans(&self) -> Result<usize, QueueError> {
        Ok(0)
    }

    /// Entries not yet completed or failed.
    async fn pending_count(&self) -> Result<usize, QueueError>;
}
