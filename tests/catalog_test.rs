//! Tests for SqliteCatalog upserts.

mod common;

use drive_import::quiz::{ParsedQuestion, QuestionKind};
use drive_import::store::{FolderRecord, LessonKind, LessonRecord, TestRecord};
use drive_import::{Catalog, SqliteCatalog};

async fn setup_catalog() -> SqliteCatalog {
    let catalog = SqliteCatalog::new(common::memory_pool().await);
    catalog.run_migrations().await.unwrap();
    catalog
}

fn folder(source_id: &str, title: &str) -> FolderRecord {
    FolderRecord {
        source_id: source_id.to_string(),
        revision: Some("r1".to_string()),
        title: title.to_string(),
        code: None,
        position: 0,
    }
}

fn lesson(course_id: &str, module_id: Option<&str>, source_id: &str) -> LessonRecord {
    LessonRecord {
        course_id: course_id.to_string(),
        module_id: module_id.map(str::to_string),
        source_id: source_id.to_string(),
        revision: Some("r1".to_string()),
        title: "Intro".to_string(),
        code: None,
        kind: LessonKind::Video,
        position: 0,
        storage_key: Some("courses/c/m/s/intro.mp4".to_string()),
        storage_location: None,
        content_type: Some("video/mp4".to_string()),
        size: Some(10),
        drive_link: None,
    }
}

fn question(prompt: &str) -> ParsedQuestion {
    ParsedQuestion {
        kind: QuestionKind::MultipleChoice,
        prompt: prompt.to_string(),
        options: vec!["a".to_string(), "b".to_string()],
        correct_answer: Some("a".to_string()),
        points: 1,
    }
}

#[tokio::test]
async fn test_upserts_never_duplicate() {
    let catalog = setup_catalog().await;

    let course = catalog.upsert_course(&folder("c1", "Course")).await.unwrap();
    let again = catalog.upsert_course(&folder("c1", "Course renamed")).await.unwrap();
    assert_eq!(course, again);

    let module = catalog.upsert_module(&course, &folder("m1", "Module")).await.unwrap();
    assert_eq!(
        module,
        catalog.upsert_module(&course, &folder("m1", "Module")).await.unwrap()
    );

    let record = lesson(&course, Some(&module), "f1");
    let lesson_id = catalog.upsert_lesson(&record).await.unwrap();
    assert_eq!(lesson_id, catalog.upsert_lesson(&record).await.unwrap());

    let counts = catalog.counts().await.unwrap();
    assert_eq!((counts.courses, counts.modules, counts.lessons), (1, 1, 1));
}

#[tokio::test]
async fn test_same_file_under_different_parents() {
    let catalog = setup_catalog().await;

    let course = catalog.upsert_course(&folder("c1", "Course")).await.unwrap();
    let m1 = catalog.upsert_module(&course, &folder("m1", "One")).await.unwrap();
    let m2 = catalog.upsert_module(&course, &folder("m2", "Two")).await.unwrap();

    let a = catalog.upsert_lesson(&lesson(&course, Some(&m1), "f1")).await.unwrap();
    let b = catalog.upsert_lesson(&lesson(&course, Some(&m2), "f1")).await.unwrap();
    let c = catalog.upsert_lesson(&lesson(&course, None, "f1")).await.unwrap();
    assert_ne!(a, b);
    assert_ne!(a, c);
    assert_eq!(catalog.counts().await.unwrap().lessons, 3);
}

#[tokio::test]
async fn test_bind_course_keeps_title_and_is_findable() {
    let catalog = setup_catalog().await;

    let course = catalog.create_course("Existing course").await.unwrap();
    assert!(catalog.course_exists(&course).await.unwrap());
    assert!(!catalog.course_exists("nope").await.unwrap());

    let bound = catalog.bind_course(&course, &folder("drive-folder", "Drive name")).await.unwrap();
    assert_eq!(bound, course);
    assert_eq!(
        catalog.find_course_by_source("drive-folder").await.unwrap(),
        Some(course.clone())
    );

    assert!(catalog.bind_course("missing", &folder("x", "x")).await.is_err());
}

#[tokio::test]
async fn test_replace_questions_drops_stale_rows() {
    let catalog = setup_catalog().await;

    let course = catalog.upsert_course(&folder("c1", "Course")).await.unwrap();
    let mut record = lesson(&course, None, "quiz");
    record.kind = LessonKind::Quiz;
    let lesson_id = catalog.upsert_lesson(&record).await.unwrap();

    let test = TestRecord {
        title: "Quiz".to_string(),
        duration_minutes: 60,
        passing_score: 70,
        max_attempts: 3,
    };
    let test_id = catalog.upsert_test(&lesson_id, &test).await.unwrap();
    assert_eq!(test_id, catalog.upsert_test(&lesson_id, &test).await.unwrap());

    let three = vec![question("one"), question("two"), question("three")];
    assert_eq!(catalog.replace_questions(&test_id, &three).await.unwrap(), 3);
    assert_eq!(catalog.replace_questions(&test_id, &three).await.unwrap(), 3);
    assert_eq!(catalog.counts().await.unwrap().questions, 3);

    catalog.replace_questions(&test_id, &three[..1]).await.unwrap();
    let counts = catalog.counts().await.unwrap();
    assert_eq!(counts.tests, 1);
    assert_eq!(counts.questions, 1);
}
