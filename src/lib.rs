//! # drive-import
//!
//! Bulk import of course material from Google Drive folders into a course
//! catalog.
//!
//! A Drive folder tree is walked and classified into an ordered list of
//! tasks (course, module, lesson, quiz), then executed strictly in order.
//! Progress is persisted after every task, so when an invocation runs out of
//! its time budget the run picks up where it stopped from a continuation on
//! a durable queue.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use drive_import::{ImportRequest, OrchestratorBuilder, Principal, Role};
//!
//! let orchestrator = OrchestratorBuilder::new(drive, storage, catalog, runs, queue)
//!     .config(ImportConfig::default().time_budget(Duration::from_secs(250)))
//!     .runner_secret(secret)
//!     .build();
//!
//! let request = ImportRequest {
//!     folder: "https://drive.google.com/drive/folders/1AbC".into(),
//!     course_id: None,
//! };
//! let outcome = orchestrator.start(&request, &Principal::new("u1", Role::Admin)).await?;
//! ```
//!
//! Continuations are drained in the background:
//!
//! ```rust,ignore
//! let worker = ContinuationWorkerBuilder::new(queue, orchestrator)
//!     .poll_interval(Duration::from_millis(500))
//!     .max_concurrent(4)
//!     .build();
//! tokio::spawn(async move { worker.run().await });
//! ```
//!
//! ## Feature Flags
//!
//! - `sqlite` - SQLite-backed run store, catalog and continuation queue
//! - `s3` - S3 (or S3-compatible) object storage

pub mod auth;
pub mod classify;
pub mod config;
pub mod drive;
pub mod executor;
pub mod orchestrator;
pub mod payload;
pub mod plan;
pub mod queue;
pub mod quiz;
pub mod retry;
pub mod run;
pub mod storage;
pub mod store;
pub mod task;

pub use auth::{Principal, Role};
pub use classify::{classify, ClassifierRules, NodeFacts};
pub use config::{ImportConfig, TestDefaults};
pub use drive::{
    parse_folder_reference, DriveAuth, DriveClient, DriveError, DriveNode, GoogleDriveClient,
    InMemoryDrive, ServiceAccountKey,
};
pub use executor::{ExecError, ImportExecutor};
pub use orchestrator::{
    ImportPlan, ImportRequest, Orchestrator, OrchestratorBuilder, OrchestratorError, RunOutcome,
    RunReport, TaskFailure,
};
pub use payload::ImportRunnerPayload;
pub use plan::{build_tasks, enumerate_tree, merge_with_existing, summarize, ImportSummary};
pub use queue::{
    ContinuationHandler, ContinuationQueue, ContinuationWorker, ContinuationWorkerBuilder, Handled,
    QueueEntryId, QueueError, QueuedContinuation,
};
pub use retry::RetryPolicy;
pub use run::{Cursor, ImportRun, RunId, RunState};
pub use storage::{ByteStream, LocalObjectStore, ObjectStore, StorageError, StoredObject};
pub use store::{Catalog, CatalogCounts, RunStore, StoreError};
pub use task::{ImportTask, TaskId, TaskKind, TaskOutcome, TaskStatus};

#[cfg(feature = "sqlite")]
pub use queue::SqliteContinuationQueue;

#[cfg(feature = "sqlite")]
pub use store::{SqliteCatalog, SqliteRunStore};

#[cfg(feature = "s3")]
pub use storage::{S3Config, S3ObjectStore};
