//! End-to-end imports against an in-memory Drive and SQLite.

mod common;

use common::{admin, seed_course, test_config, Harness, QUIZ_TEXT, SECRET};
use drive_import::drive::mime;
use drive_import::{
    Catalog, ContinuationQueue, Cursor, ImportRequest, ImportRunnerPayload, OrchestratorError,
    Principal, Role, RunOutcome, RunState, RunStore, TaskKind, TaskStatus,
};

fn collection_request() -> ImportRequest {
    ImportRequest {
        folder: "https://drive.google.com/drive/folders/root?usp=sharing".to_string(),
        course_id: None,
    }
}

#[tokio::test]
async fn test_import_course_tree() {
    let h = Harness::new().await;
    seed_course(&h.drive);
    let orchestrator = h.orchestrator(test_config());

    let outcome = orchestrator.start(&collection_request(), &admin()).await.unwrap();
    let RunOutcome::Finished(report) = outcome else {
        panic!("expected the run to finish within budget");
    };
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.cursor.position, 4);
    assert_eq!(report.summary.total, 4);
    assert_eq!(report.summary.done, 4);
    assert_eq!(report.summary.percentage, 100);
    assert!(report.failures.is_empty());

    let counts = h.catalog.counts().await.unwrap();
    assert_eq!(counts.courses, 1);
    assert_eq!(counts.modules, 1);
    assert_eq!(counts.lessons, 2);

    let run = h.runs.load_run(report.run_id).await.unwrap().unwrap();
    let kinds: Vec<_> = run.tasks.iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TaskKind::Course,
            TaskKind::Module,
            TaskKind::LessonVideo,
            TaskKind::LessonDocument
        ]
    );
    assert!(run.tasks.iter().all(|t| t.entity_id.is_some()));
    assert_eq!(run.requested_by.as_deref(), Some("admin-1"));

    // Content landed in object storage
    let stored = walk(h.storage_dir.path());
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().any(|p| p.ends_with("video1.mp4")));
}

fn walk(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            files.extend(walk(&path));
        } else {
            files.push(path);
        }
    }
    files
}

#[tokio::test]
async fn test_reimport_skips_done_tasks() {
    let h = Harness::new().await;
    seed_course(&h.drive);
    let orchestrator = h.orchestrator(test_config());

    orchestrator.start(&collection_request(), &admin()).await.unwrap();
    let fetches = h.drive.fetch_count();
    let counts = h.catalog.counts().await.unwrap();

    let outcome = orchestrator.start(&collection_request(), &admin()).await.unwrap();
    assert!(outcome.is_finished());
    assert_eq!(outcome.report().state, RunState::Completed);
    assert_eq!(h.drive.fetch_count(), fetches);
    assert_eq!(h.catalog.counts().await.unwrap(), counts);
}

#[tokio::test]
async fn test_changed_file_is_imported_again() {
    let h = Harness::new().await;
    seed_course(&h.drive);
    let orchestrator = h.orchestrator(test_config());

    orchestrator.start(&collection_request(), &admin()).await.unwrap();
    let fetches = h.drive.fetch_count();

    h.drive.touch("video1", "2024-06-01T00:00:00.000Z");
    orchestrator.start(&collection_request(), &admin()).await.unwrap();

    assert_eq!(h.drive.fetch_count(), fetches + 1);
    assert_eq!(h.catalog.counts().await.unwrap().lessons, 2);
}

#[tokio::test]
async fn test_failed_file_does_not_stop_the_run() {
    let h = Harness::new().await;
    seed_course(&h.drive);
    h.drive.fail_reads("video1", 404, 1);
    let orchestrator = h.orchestrator(test_config());

    let outcome = orchestrator.start(&collection_request(), &admin()).await.unwrap();
    let report = outcome.report();
    assert!(outcome.is_finished());
    assert_eq!(report.state, RunState::PartiallyFailed);
    assert_eq!(report.summary.done, 3);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].path.ends_with("video1.mp4"));
    assert!(report.failures[0].error.contains("404"));

    // The failed task is retried by the next run
    let outcome = orchestrator.start(&collection_request(), &admin()).await.unwrap();
    assert_eq!(outcome.report().state, RunState::Completed);
    assert_eq!(h.catalog.counts().await.unwrap().lessons, 2);
}

#[tokio::test]
async fn test_transient_errors_are_retried_within_a_task() {
    let h = Harness::new().await;
    seed_course(&h.drive);
    h.drive.fail_reads("doc1", 503, 2);
    let orchestrator = h.orchestrator(test_config());

    let outcome = orchestrator.start(&collection_request(), &admin()).await.unwrap();
    assert_eq!(outcome.report().state, RunState::Completed);

    let run = h.runs.load_run(outcome.report().run_id).await.unwrap().unwrap();
    let doc = run.tasks.iter().find(|t| t.source.id == "doc1").unwrap();
    assert_eq!(doc.attempts, 3);
}

#[tokio::test]
async fn test_quiz_files_become_tests() {
    let h = Harness::new().await;
    seed_course(&h.drive);
    h.drive
        .add_file("quiz1", "Quiz 1.txt", mime::TEXT, "module-1", QUIZ_TEXT)
        .add_file(
            "quiz2",
            "Avaliação final",
            mime::GOOGLE_SHEET,
            "module-1",
            "\"1. Pick one\",a) x,b) y *\n",
        )
        .add_file("notes", "notes.txt", mime::TEXT, "module-1", "just notes");
    let orchestrator = h.orchestrator(test_config());

    let outcome = orchestrator.start(&collection_request(), &admin()).await.unwrap();
    let report = outcome.report();
    assert_eq!(report.summary.quizzes, 2);
    assert_eq!(report.summary.skipped, 1);
    assert_eq!(report.state, RunState::Completed);

    let counts = h.catalog.counts().await.unwrap();
    assert_eq!(counts.tests, 2);
    assert_eq!(counts.questions, 3);
    assert_eq!(counts.lessons, 4);
}

#[tokio::test]
async fn test_quiz_without_questions_fails_the_task() {
    let h = Harness::new().await;
    seed_course(&h.drive);
    h.drive
        .add_file("quiz1", "Quiz 1.txt", mime::TEXT, "module-1", "nothing to parse");
    let orchestrator = h.orchestrator(test_config());

    let outcome = orchestrator.start(&collection_request(), &admin()).await.unwrap();
    let report = outcome.report();
    assert_eq!(report.state, RunState::PartiallyFailed);
    assert!(report.failures[0].error.contains("no questions"));
}

#[tokio::test]
async fn test_import_into_existing_course() {
    let h = Harness::new().await;
    seed_course(&h.drive);
    let course_id = h.catalog.create_course("Existing").await.unwrap();
    let orchestrator = h.orchestrator(test_config());

    let request = ImportRequest {
        folder: "course-a".to_string(),
        course_id: Some(course_id.clone()),
    };
    let outcome = orchestrator.start(&request, &admin()).await.unwrap();
    assert_eq!(outcome.report().state, RunState::Completed);
    assert_eq!(outcome.report().summary.courses, 1);

    let counts = h.catalog.counts().await.unwrap();
    assert_eq!(counts.courses, 1);
    assert_eq!(counts.lessons, 2);
    assert_eq!(
        h.catalog.find_course_by_source("course-a").await.unwrap(),
        Some(course_id)
    );
}

#[tokio::test]
async fn test_request_validation() {
    let h = Harness::new().await;
    seed_course(&h.drive);
    let orchestrator = h.orchestrator(test_config());

    let student = Principal::new("s1", Role::Student);
    let err = orchestrator.start(&collection_request(), &student).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Forbidden(_)));

    let bad = ImportRequest {
        folder: "not a folder link".to_string(),
        course_id: None,
    };
    let err = orchestrator.start(&bad, &admin()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));

    let file = ImportRequest {
        folder: "video1".to_string(),
        course_id: None,
    };
    let err = orchestrator.start(&file, &admin()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));

    let missing = ImportRequest {
        folder: "gone".to_string(),
        course_id: None,
    };
    let err = orchestrator.start(&missing, &admin()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));

    let no_course = ImportRequest {
        folder: "course-a".to_string(),
        course_id: Some("no-such-course".to_string()),
    };
    let err = orchestrator.start(&no_course, &admin()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));

    assert_eq!(h.catalog.counts().await.unwrap().courses, 0);
}

#[tokio::test]
async fn test_single_item_retry_does_not_duplicate() {
    let h = Harness::new().await;
    seed_course(&h.drive);
    let course_id = h.catalog.create_course("Existing").await.unwrap();
    let orchestrator = h.orchestrator(test_config());

    let plan = orchestrator
        .plan(&ImportRequest {
            folder: "course-a".to_string(),
            course_id: Some(course_id.clone()),
        })
        .await
        .unwrap();
    assert_eq!(plan.tasks.len(), 4);
    assert!(plan.tasks.iter().all(|t| t.status == TaskStatus::Pending));

    for task in &plan.tasks[..2] {
        let outcome = orchestrator
            .execute_single(task, &course_id, &admin())
            .await
            .unwrap();
        assert!(outcome.is_done());
    }

    h.drive.fail_reads("video1", 503, 1);
    let video = &plan.tasks[2];
    let first = orchestrator
        .execute_single(video, &course_id, &admin())
        .await
        .unwrap();
    assert!(first.is_done());
    assert_eq!(first.attempts, 2);

    let second = orchestrator
        .execute_single(video, &course_id, &admin())
        .await
        .unwrap();
    assert!(second.is_done());
    assert_eq!(second.entity_id, first.entity_id);
    assert_eq!(h.catalog.counts().await.unwrap().lessons, 1);
}

#[tokio::test]
async fn test_single_item_reports_exact_error() {
    let h = Harness::new().await;
    seed_course(&h.drive);
    let course_id = h.catalog.create_course("Existing").await.unwrap();
    let orchestrator = h.orchestrator(test_config());

    let plan = orchestrator
        .plan(&ImportRequest {
            folder: "course-a".to_string(),
            course_id: Some(course_id.clone()),
        })
        .await
        .unwrap();

    // Module row was never created, so the lesson has no parent
    let outcome = orchestrator
        .execute_single(&plan.tasks[3], &course_id, &admin())
        .await
        .unwrap();
    assert_eq!(outcome.status, TaskStatus::Failed);
    let error = outcome.error.unwrap();
    assert!(error.contains("doc1.pdf"));
    assert!(error.contains("module-1"));
}

#[tokio::test]
async fn test_single_item_updates_persisted_run() {
    let h = Harness::new().await;
    seed_course(&h.drive);
    h.drive.fail_reads("video1", 404, 1);
    let orchestrator = h.orchestrator(test_config());

    let outcome = orchestrator.start(&collection_request(), &admin()).await.unwrap();
    let run_id = outcome.report().run_id;
    let failed_id = outcome.report().failures[0].task_id;

    let run = h.runs.load_run(run_id).await.unwrap().unwrap();
    let task = run.tasks.iter().find(|t| t.id == failed_id).unwrap().clone();
    let course_id = h.catalog.find_course_by_source("course-a").await.unwrap().unwrap();

    assert_eq!(outcome.report().state, RunState::PartiallyFailed);

    let result = orchestrator
        .execute_single(&task, &course_id, &admin())
        .await
        .unwrap();
    assert!(result.is_done());

    let status = orchestrator.status(run_id).await.unwrap();
    assert!(status.failures.is_empty());
    assert_eq!(status.summary.done, 4);
    assert_eq!(status.state, RunState::Completed);
}

#[tokio::test]
async fn test_single_item_leaves_active_run_state_alone() {
    let h = Harness::new().await;
    seed_course(&h.drive);
    let orchestrator = h.orchestrator(common::zero_budget_config());

    let outcome = orchestrator.start(&collection_request(), &admin()).await.unwrap();
    let run_id = outcome.report().run_id;
    let run = h.runs.load_run(run_id).await.unwrap().unwrap();
    let module = run.tasks[1].clone();
    let course_id = h.catalog.find_course_by_source("course-a").await.unwrap().unwrap();

    let result = orchestrator
        .execute_single(&module, &course_id, &admin())
        .await
        .unwrap();
    assert!(result.is_done());

    let status = orchestrator.status(run_id).await.unwrap();
    assert_eq!(status.state, RunState::TimedOutContinuing);
    assert_eq!(status.cursor.position, 1);
    assert_eq!(status.summary.done, 2);
}

#[tokio::test]
async fn test_wrong_secret_is_rejected_without_side_effects() {
    let h = Harness::new().await;
    seed_course(&h.drive);
    let orchestrator = h.orchestrator(common::zero_budget_config());

    let outcome = orchestrator.start(&collection_request(), &admin()).await.unwrap();
    let run_id = outcome.report().run_id;
    let before = h.runs.load_run(run_id).await.unwrap().unwrap();
    let queued = h.queue.pending_count().await.unwrap();

    let forged = ImportRunnerPayload::new(run_id, "guess", before.cursor);
    let err = orchestrator.accept_continuation(&forged).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Authentication(_)));
    let err = orchestrator.resume(&forged).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Authentication(_)));

    let after = h.runs.load_run(run_id).await.unwrap().unwrap();
    assert_eq!(after.cursor, before.cursor);
    assert_eq!(after.state, before.state);
    assert_eq!(h.queue.pending_count().await.unwrap(), queued);

    let unknown = ImportRunnerPayload::new(drive_import::RunId::new(), SECRET, Cursor::default());
    let err = orchestrator.accept_continuation(&unknown).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}
