//! Tests for SqliteContinuationQueue.

mod common;

use drive_import::{ContinuationQueue, Cursor, ImportRunnerPayload, RunId, SqliteContinuationQueue};

async fn setup_queue() -> SqliteContinuationQueue {
    let queue = SqliteContinuationQueue::new(common::memory_pool().await);
    queue.run_migrations().await.unwrap();
    queue
}

fn payload(position: u32) -> ImportRunnerPayload {
    ImportRunnerPayload::new(
        RunId::new(),
        common::SECRET,
        Cursor {
            position,
            last_task: None,
        },
    )
}

#[tokio::test]
async fn test_enqueue_and_claim() {
    let queue = setup_queue().await;

    let sent = payload(3);
    let id = queue.enqueue(&sent).await.unwrap();

    let claimed = queue.claim(10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, id);
    assert_eq!(claimed[0].payload, sent);
    assert_eq!(claimed[0].attempts, 1);

    // Running entries are not handed out twice
    assert!(queue.claim(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_claim_is_oldest_first_and_limited() {
    let queue = setup_queue().await;

    let first = queue.enqueue(&payload(1)).await.unwrap();
    let second = queue.enqueue(&payload(2)).await.unwrap();
    queue.enqueue(&payload(3)).await.unwrap();

    let claimed = queue.claim(2).await.unwrap();
    let ids: Vec<_> = claimed.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![first, second]);
    assert_eq!(queue.pending_count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_complete_and_fail_settle_entries() {
    let queue = setup_queue().await;

    let done = queue.enqueue(&payload(1)).await.unwrap();
    let broken = queue.enqueue(&payload(2)).await.unwrap();
    queue.claim(10).await.unwrap();

    queue.complete(done).await.unwrap();
    queue.fail(broken, &"x".repeat(5000)).await.unwrap();

    assert_eq!(queue.pending_count().await.unwrap(), 0);
    assert!(queue.claim(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recover_orphans() {
    let queue = setup_queue().await;

    queue.enqueue(&payload(1)).await.unwrap();
    queue.enqueue(&payload(2)).await.unwrap();
    assert_eq!(queue.claim(10).await.unwrap().len(), 2);

    // Simulated crash: both entries stuck in running
    let recovered = queue.recover_orphans().await.unwrap();
    assert_eq!(recovered, 2);

    let reclaimed = queue.claim(10).await.unwrap();
    assert_eq!(reclaimed.len(), 2);
    assert!(reclaimed.iter().all(|c| c.attempts == 2));
}
