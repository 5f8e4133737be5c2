//! Job orchestrator: plans a run, drives it task by task within a time
//! budget, and hands off to a continuation when the budget runs out.
//!
//! One run is driven by at most one invocation at a time. The driver holds
//! a lease on the run and moves the cursor with a compare-and-set, so a
//! manual continuation racing a queued one either waits out the lease
//! ([`OrchestratorError::RunBusy`]) or finds the cursor already moved.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::Principal;
use crate::config::ImportConfig;
use crate::drive::{parse_folder_reference, DriveClient, DriveError, DriveNode};
use crate::executor::ImportExecutor;
use crate::payload::ImportRunnerPayload;
use crate::plan::{build_tasks, enumerate_tree, merge_with_existing, summarize, ImportSummary, TreeMode};
use crate::queue::{ContinuationHandler, ContinuationQueue, Handled, QueueEntryId, QueueError};
use crate::run::{Cursor, ImportRun, RunId, RunState};
use crate::storage::ObjectStore;
use crate::store::{Catalog, RunStore, StoreError};
use crate::task::{ImportTask, TaskId, TaskOutcome};

/// Errors surfaced to callers of the [`Orchestrator`]. Task failures are
/// not among them: those are recorded on the task and the run goes on.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("run {0} is being driven by another invocation")]
    RunBusy(RunId),

    #[error("drive error: {0}")]
    Upstream(String),

    /// Run state could not be read or written.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        Self::Fatal(err.to_string())
    }
}

impl From<QueueError> for OrchestratorError {
    fn from(err: QueueError) -> Self {
        Self::Fatal(err.to_string())
    }
}

impl From<DriveError> for OrchestratorError {
    fn from(err: DriveError) -> Self {
        match err {
            DriveError::NotAFolder(name) => Self::Validation(format!("{name} is not a folder")),
            e if e.is_not_found() => {
                Self::NotFound(format!("folder not found or not shared with the importer: {e}"))
            }
            e => Self::Upstream(e.to_string()),
        }
    }
}

/// What to import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    /// Folder id or any Drive folder URL.
    pub folder: String,
    /// Existing course to import into. Without it every subfolder of the
    /// root becomes a course.
    pub course_id: Option<String>,
}

/// Task list for a folder, computed without executing anything.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPlan {
    pub root: DriveNode,
    pub course_id: Option<String>,
    pub tasks: Vec<ImportTask>,
    pub summary: ImportSummary,
}

/// A failed task as listed in a [`RunReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFailure {
    pub task_id: TaskId,
    pub path: String,
    pub error: String,
}

/// Snapshot of a run for callers and the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: RunId,
    pub state: RunState,
    pub cursor: Cursor,
    pub summary: ImportSummary,
    pub failures: Vec<TaskFailure>,
    pub error: Option<String>,
}

impl RunReport {
    /// Summarize a loaded run.
    pub fn from_run(run: &ImportRun) -> Self {
        Self {
            run_id: run.id,
            state: run.state,
            cursor: run.cursor,
            summary: summarize(&run.tasks),
            failures: run
                .failed_tasks()
                .map(|t| TaskFailure {
                    task_id: t.id,
                    path: t.path.clone(),
                    error: t.error.clone().unwrap_or_default(),
                })
                .collect(),
            error: run.error.clone(),
        }
    }
}

/// Result of driving a run for one invocation.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The cursor reached the end.
    Finished(RunReport),
    /// The budget ran out; a continuation has been enqueued.
    Continuing(RunReport),
}

impl RunOutcome {
    /// The run snapshot, whichever way the invocation ended.
    pub fn report(&self) -> &RunReport {
        match self {
            Self::Finished(report) | Self::Continuing(report) => report,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}

/// How a locked drive loop ended.
enum Stop {
    Finished(ImportRun),
    OutOfBudget(ImportRun),
}

/// Drives import runs: planning, the budgeted task loop, continuations
/// and single-task retries. Built with [`OrchestratorBuilder`].
pub struct Orchestrator {
    drive: Arc<dyn DriveClient>,
    catalog: Arc<dyn Catalog>,
    runs: Arc<dyn RunStore>,
    queue: Arc<dyn ContinuationQueue>,
    executor: ImportExecutor,
    config: ImportConfig,
    runner_secret: String,
    instance: String,
}

impl Orchestrator {
    /// Settings the orchestrator was built with.
    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Enumerate the folder and build its task list, merged with the
    /// latest prior run over the same folder. Nothing is persisted.
    pub async fn plan(&self, request: &ImportRequest) -> Result<ImportPlan, OrchestratorError> {
        Ok(self.plan_with_prior(request).await?.0)
    }

    async fn plan_with_prior(
        &self,
        request: &ImportRequest,
    ) -> Result<(ImportPlan, Option<ImportRun>), OrchestratorError> {
        let folder_id = parse_folder_reference(&request.folder).ok_or_else(|| {
            OrchestratorError::Validation(format!("not a Drive folder: {}", request.folder))
        })?;

        if let Some(course_id) = request.course_id.as_deref() {
            if !self.catalog.course_exists(course_id).await? {
                return Err(OrchestratorError::NotFound(format!("course {course_id}")));
            }
        }

        let root = self.drive.resolve_folder(&folder_id).await?;
        let mode = match request.course_id {
            Some(_) => TreeMode::SingleCourse,
            None => TreeMode::Collection,
        };
        let tree = enumerate_tree(self.drive.as_ref(), root, mode, &self.config.rules).await?;
        let tasks = build_tasks(&tree, &self.config.rules);

        let prior = self
            .runs
            .latest_run_for_source(&tree.root.id, request.course_id.as_deref())
            .await?;
        let tasks = match &prior {
            Some(prior) => {
                debug!(prior_run = %prior.id, "merging with prior run");
                merge_with_existing(tasks, &prior.tasks)
            }
            None => tasks,
        };

        let plan = ImportPlan {
            summary: summarize(&tasks),
            root: tree.root,
            course_id: request.course_id.clone(),
            tasks,
        };
        Ok((plan, prior))
    }

    /// Plan, persist and drive a new run.
    ///
    /// A folder has at most one active run. If the latest run over the same
    /// folder is waiting on its continuation the request fails with
    /// [`OrchestratorError::RunBusy`]; if it is queued or running, that run
    /// is driven instead, which takes it over when its driver is gone.
    pub async fn start(
        &self,
        request: &ImportRequest,
        principal: &Principal,
    ) -> Result<RunOutcome, OrchestratorError> {
        if !principal.can_import() {
            return Err(OrchestratorError::Forbidden(
                "only admins and instructors can import courses".to_string(),
            ));
        }

        let (plan, prior) = self.plan_with_prior(request).await?;
        if let Some(prior) = prior.filter(|r| r.state.is_active()) {
            if prior.state == RunState::TimedOutContinuing {
                info!(run_id = %prior.id, "import already in progress");
                return Err(OrchestratorError::RunBusy(prior.id));
            }
            info!(run_id = %prior.id, state = %prior.state, "driving unfinished run");
            return self.drive_run(prior.id).await;
        }

        let mut run = ImportRun::new(
            plan.root.id.clone(),
            plan.root.name.clone(),
            plan.course_id,
            plan.tasks,
        );
        run.requested_by = Some(principal.user_id.clone());
        self.runs.create_run(&run).await?;

        info!(
            run_id = %run.id,
            root = %run.root_folder_id,
            tasks = run.tasks.len(),
            pending = plan.summary.pending + plan.summary.failed,
            "import run created"
        );
        self.drive_run(run.id).await
    }

    /// Check a continuation and put it on the durable queue.
    pub async fn accept_continuation(
        &self,
        payload: &ImportRunnerPayload,
    ) -> Result<QueueEntryId, OrchestratorError> {
        self.authorize(payload)?;
        if self.runs.load_run(payload.run_id()).await?.is_none() {
            return Err(OrchestratorError::NotFound(format!("run {}", payload.run_id())));
        }
        let id = self.queue.enqueue(payload).await?;
        info!(run_id = %payload.run_id(), entry = %id, "continuation accepted");
        Ok(id)
    }

    /// Continue a run from its persisted cursor.
    pub async fn resume(
        &self,
        payload: &ImportRunnerPayload,
    ) -> Result<RunOutcome, OrchestratorError> {
        self.authorize(payload)?;
        let run_id = payload.run_id();
        let run = self
            .runs
            .load_run(run_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("run {run_id}")))?;

        if payload.cursor().position > run.cursor.position {
            return Err(OrchestratorError::Validation(format!(
                "continuation cursor {} is ahead of run cursor {}",
                payload.cursor().position,
                run.cursor.position
            )));
        }
        if run.state.is_finished() {
            debug!(run_id = %run_id, state = %run.state, "run already finished");
            return Ok(RunOutcome::Finished(RunReport::from_run(&run)));
        }
        self.drive_run(run_id).await
    }

    /// Execute one task right away, outside of any cursor. If the task is
    /// part of a persisted run its stored status is updated too.
    pub async fn execute_single(
        &self,
        task: &ImportTask,
        course_id: &str,
        principal: &Principal,
    ) -> Result<TaskOutcome, OrchestratorError> {
        if !principal.can_import() {
            return Err(OrchestratorError::Forbidden(
                "only admins and instructors can import courses".to_string(),
            ));
        }
        if !self.catalog.course_exists(course_id).await? {
            return Err(OrchestratorError::NotFound(format!("course {course_id}")));
        }

        let outcome = self.executor.execute(task, Some(course_id)).await;
        info!(
            task = %task.id,
            kind = task.kind.as_str(),
            status = outcome.status.as_str(),
            user = %principal.user_id,
            "single task executed"
        );

        match self.runs.find_task(task.id).await {
            Ok(Some((run_id, mut persisted))) => {
                persisted.apply(&outcome);
                let recorded = match self.runs.update_task(run_id, &persisted).await {
                    Ok(()) => self.settle_run_state(run_id).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = recorded {
                    warn!(run_id = %run_id, task = %task.id, error = %e, "could not record task status");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(task = %task.id, error = %e, "could not look up task run"),
        }
        Ok(outcome)
    }

    /// Current state, cursor, counts and failures of a run.
    pub async fn status(&self, run_id: RunId) -> Result<RunReport, OrchestratorError> {
        let run = self
            .runs
            .load_run(run_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("run {run_id}")))?;
        Ok(RunReport::from_run(&run))
    }

    /// Re-derive the final state of a run whose cursor already reached the
    /// end, after one of its tasks changed outside the drive loop.
    async fn settle_run_state(&self, run_id: RunId) -> Result<(), StoreError> {
        let Some(run) = self.runs.load_run(run_id).await? else {
            return Ok(());
        };
        if !run.state.is_finished() || run.remaining() > 0 {
            return Ok(());
        }
        let state = run.final_state();
        if state != run.state {
            self.runs.set_state(run_id, state, None).await?;
            info!(run_id = %run_id, from = %run.state, to = %state, "run state settled");
        }
        Ok(())
    }

    fn authorize(&self, payload: &ImportRunnerPayload) -> Result<(), OrchestratorError> {
        if payload.verify(&self.runner_secret) {
            Ok(())
        } else {
            warn!(run_id = %payload.run_id(), "continuation rejected: bad secret");
            Err(OrchestratorError::Authentication(
                "invalid runner secret".to_string(),
            ))
        }
    }

    /// Drive a run under its lease until it finishes or the budget runs out.
    async fn drive_run(&self, run_id: RunId) -> Result<RunOutcome, OrchestratorError> {
        let owner = format!("{}:{}", self.instance, Uuid::new_v4());
        if !self
            .runs
            .try_lock(run_id, &owner, self.config.lock_lease)
            .await?
        {
            return Err(OrchestratorError::RunBusy(run_id));
        }

        let result = self.drive_locked(run_id, &owner).await;

        if let Err(e) = self.runs.release_lock(run_id, &owner).await {
            warn!(run_id = %run_id, error = %e, "failed to release run lock");
        }

        match result {
            Ok(Stop::Finished(run)) => {
                info!(run_id = %run_id, state = %run.state, "import run finished");
                Ok(RunOutcome::Finished(RunReport::from_run(&run)))
            }
            Ok(Stop::OutOfBudget(run)) => {
                // Enqueued only after the lease is released, so the
                // continuation never finds its own run locked.
                let payload = ImportRunnerPayload::new(run_id, &self.runner_secret, run.cursor);
                if let Err(e) = self.queue.enqueue(&payload).await {
                    return Err(self.abort(run_id, e.into()).await);
                }
                info!(
                    run_id = %run_id,
                    cursor = run.cursor.position,
                    remaining = run.remaining(),
                    "time budget exhausted, continuation enqueued"
                );
                Ok(RunOutcome::Continuing(RunReport::from_run(&run)))
            }
            Err(e @ OrchestratorError::Fatal(_)) => Err(self.abort(run_id, e).await),
            Err(e) => Err(e),
        }
    }

    async fn abort(&self, run_id: RunId, err: OrchestratorError) -> OrchestratorError {
        error!(run_id = %run_id, error = %err, "import run aborted");
        let message = err.to_string();
        if let Err(e) = self
            .runs
            .set_state(run_id, RunState::Aborted, Some(&message))
            .await
        {
            error!(run_id = %run_id, error = %e, "could not mark run aborted");
        }
        err
    }

    async fn drive_locked(&self, run_id: RunId, owner: &str) -> Result<Stop, OrchestratorError> {
        let started = Instant::now();
        let mut run = self
            .runs
            .load_run(run_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("run {run_id}")))?;

        self.runs.set_state(run_id, RunState::Running, None).await?;
        run.state = RunState::Running;
        run.error = None;

        let index: HashMap<TaskId, usize> =
            run.tasks.iter().enumerate().map(|(i, t)| (t.id, i)).collect();
        let total = run.tasks.len();
        let mut position = run.cursor.position as usize;

        while position < total {
            let executed = !run.tasks[position].is_done();
            if executed {
                let parent_done = run.tasks[position]
                    .parent
                    .and_then(|p| index.get(&p))
                    .map_or(true, |&i| run.tasks[i].is_done());

                let outcome = if parent_done {
                    run.tasks[position].mark_in_progress();
                    self.runs.update_task(run_id, &run.tasks[position]).await?;
                    self.executor
                        .execute(&run.tasks[position], run.course_id.as_deref())
                        .await
                } else {
                    TaskOutcome::failed(
                        format!("{}: parent task is not done", run.tasks[position].path),
                        0,
                    )
                };

                run.tasks[position].apply(&outcome);
                self.runs.update_task(run_id, &run.tasks[position]).await?;
            }

            let next = Cursor::after(position as u32 + 1, run.tasks[position].id);
            if !self
                .runs
                .advance_cursor(run_id, position as u32, next)
                .await?
            {
                return Err(OrchestratorError::RunBusy(run_id));
            }
            run.cursor = next;
            position += 1;

            debug!(
                run_id = %run_id,
                cursor = position,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "cursor advanced"
            );

            if executed && position < total {
                if !self
                    .runs
                    .try_lock(run_id, owner, self.config.lock_lease)
                    .await?
                {
                    return Err(OrchestratorError::RunBusy(run_id));
                }
                if started.elapsed() >= self.config.time_budget {
                    self.runs
                        .set_state(run_id, RunState::TimedOutContinuing, None)
                        .await?;
                    run.state = RunState::TimedOutContinuing;
                    return Ok(Stop::OutOfBudget(run));
                }
            }
        }

        let state = run.final_state();
        self.runs.set_state(run_id, state, None).await?;
        run.state = state;
        Ok(Stop::Finished(run))
    }
}

#[async_trait]
impl ContinuationHandler for Orchestrator {
    async fn handle(&self, payload: ImportRunnerPayload) -> Result<Handled, QueueError> {
        match self.resume(&payload).await {
            Ok(_) => Ok(Handled::Done),
            // The lease holder may have died with it; try again once it lapses.
            Err(OrchestratorError::RunBusy(run_id)) => {
                let lease = chrono::Duration::from_std(self.config.lock_lease)
                    .unwrap_or_else(|_| chrono::Duration::minutes(5));
                let retry_at = Utc::now() + lease;
                debug!(run_id = %run_id, retry_at = %retry_at, "run busy, deferring continuation");
                Ok(Handled::RetryAt(retry_at))
            }
            Err(e) => Err(QueueError::Handler(e.to_string())),
        }
    }
}

/// Builder for an [`Orchestrator`].
pub struct OrchestratorBuilder {
    drive: Arc<dyn DriveClient>,
    storage: Arc<dyn ObjectStore>,
    catalog: Arc<dyn Catalog>,
    runs: Arc<dyn RunStore>,
    queue: Arc<dyn ContinuationQueue>,
    config: ImportConfig,
    runner_secret: String,
    instance: String,
}

impl OrchestratorBuilder {
    /// Start from the collaborators, with default settings, the instance
    /// name `importer` and no runner secret.
    pub fn new(
        drive: Arc<dyn DriveClient>,
        storage: Arc<dyn ObjectStore>,
        catalog: Arc<dyn Catalog>,
        runs: Arc<dyn RunStore>,
        queue: Arc<dyn ContinuationQueue>,
    ) -> Self {
        Self {
            drive,
            storage,
            catalog,
            runs,
            queue,
            config: ImportConfig::default(),
            runner_secret: String::new(),
            instance: "importer".to_string(),
        }
    }

    /// Replace the default [`ImportConfig`].
    pub fn config(mut self, config: ImportConfig) -> Self {
        self.config = config;
        self
    }

    /// Shared secret continuations must carry. Empty rejects every one.
    pub fn runner_secret(mut self, secret: impl Into<String>) -> Self {
        self.runner_secret = secret.into();
        self
    }

    /// Prefix for lock owners, e.g. a host name.
    pub fn instance(mut self, name: impl Into<String>) -> Self {
        self.instance = name.into();
        self
    }

    /// Build the orchestrator and its executor.
    pub fn build(self) -> Orchestrator {
        let executor = ImportExecutor::new(
            self.drive.clone(),
            self.storage,
            self.catalog.clone(),
            self.config.clone(),
        );
        Orchestrator {
            drive: self.drive,
            catalog: self.catalog,
            runs: self.runs,
            queue: self.queue,
            executor,
            config: self.config,
            runner_secret: self.runner_secret,
            instance: self.instance,
        }
    }
}
