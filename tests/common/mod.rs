//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use drive_import::drive::mime;
use drive_import::{
    ContinuationQueue, ImportConfig, InMemoryDrive, LocalObjectStore, Orchestrator,
    OrchestratorBuilder, Principal, RetryPolicy, Role, SqliteCatalog, SqliteContinuationQueue,
    SqliteRunStore,
};

pub const SECRET: &str = "runner-secret";

pub const QUIZ_TEXT: &str = "1. What is 2 + 2?\na) 3\nb) 4 *\nc) 5\n\n\
2. The sky is blue. Verdadeiro ou falso?\nResposta: V\n";

pub async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap()
}

pub struct Harness {
    pub pool: SqlitePool,
    pub drive: Arc<InMemoryDrive>,
    pub catalog: Arc<SqliteCatalog>,
    pub runs: Arc<SqliteRunStore>,
    pub queue: Arc<SqliteContinuationQueue>,
    pub storage_dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        let pool = memory_pool().await;
        let catalog = SqliteCatalog::new(pool.clone());
        catalog.run_migrations().await.unwrap();
        let runs = SqliteRunStore::new(pool.clone());
        runs.run_migrations().await.unwrap();
        let queue = SqliteContinuationQueue::new(pool.clone());
        queue.run_migrations().await.unwrap();

        Self {
            pool,
            drive: Arc::new(InMemoryDrive::new()),
            catalog: Arc::new(catalog),
            runs: Arc::new(runs),
            queue: Arc::new(queue),
            storage_dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn orchestrator(&self, config: ImportConfig) -> Orchestrator {
        OrchestratorBuilder::new(
            self.drive.clone(),
            Arc::new(LocalObjectStore::new(self.storage_dir.path())),
            self.catalog.clone(),
            self.runs.clone(),
            self.queue.clone() as Arc<dyn ContinuationQueue>,
        )
        .config(config)
        .runner_secret(SECRET)
        .build()
    }
}

/// Generous budget, near-instant retries.
pub fn test_config() -> ImportConfig {
    ImportConfig::default().retry(RetryPolicy::fixed(2, Duration::from_millis(1)))
}

/// Every executed task exhausts the budget.
pub fn zero_budget_config() -> ImportConfig {
    test_config().time_budget(Duration::ZERO)
}

pub fn admin() -> Principal {
    Principal::new("admin-1", Role::Admin)
}

/// `root/Course A/Module 1/{video1.mp4, doc1.pdf}`
pub fn seed_course(drive: &InMemoryDrive) {
    drive
        .add_folder("root", "Imports", None)
        .add_folder("course-a", "Course A", Some("root"))
        .add_folder("module-1", "Module 1", Some("course-a"))
        .add_file("video1", "video1.mp4", "video/mp4", "module-1", vec![7u8; 1024])
        .add_file("doc1", "doc1.pdf", mime::PDF, "module-1", b"%PDF-1.4 test".to_vec());
}
