//! Background worker draining the continuation queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::{ContinuationQueue, QueueError, QueuedContinuation};
use crate::payload::ImportRunnerPayload;

/// What the worker does with an entry once its handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// Settle the entry as completed.
    Done,
    /// Put the entry back, claimable again from the given time.
    RetryAt(DateTime<Utc>),
}

/// Whatever resumes a run from a continuation payload.
#[async_trait]
pub trait ContinuationHandler: Send + Sync {
    async fn handle(&self, payload: ImportRunnerPayload) -> Result<Handled, QueueError>;
}

/// Polls a [`ContinuationQueue`] and feeds claimed payloads to a handler.
pub struct ContinuationWorker<Q: ContinuationQueue, H: ContinuationHandler> {
    queue: Arc<Q>,
    handler: Arc<H>,
    poll_interval: Duration,
    max_concurrent: usize,
}

impl<Q, H> ContinuationWorker<Q, H>
where
    Q: ContinuationQueue + 'static,
    H: ContinuationHandler + 'static,
{
    /// Run the worker loop indefinitely.
    pub async fn run(&self) -> ! {
        match self.queue.recover_orphans().await {
            Ok(0) => {}
            Ok(n) => info!(recovered = n, "requeued orphaned continuations"),
            Err(e) => warn!(error = %e, "orphan recovery failed"),
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));

        loop {
            let available = semaphore.available_permits();
            if available > 0 {
                match self.queue.claim(available).await {
                    Ok(entries) => {
                        for entry in entries {
                            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                                break;
                            };
                            let queue = self.queue.clone();
                            let handler = self.handler.clone();

                            tokio::spawn(async move {
                                process(queue.as_ref(), handler.as_ref(), entry).await;
                                drop(permit);
                            });
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to claim continuations"),
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Claim one batch and process it to completion. Returns how many
    /// entries were handled.
    pub async fn run_once(&self) -> Result<usize, QueueError> {
        let entries = self.queue.claim(self.max_concurrent).await?;
        let count = entries.len();
        join_all(
            entries
                .into_iter()
                .map(|entry| process(self.queue.as_ref(), self.handler.as_ref(), entry)),
        )
        .await;
        Ok(count)
    }
}

async fn process<Q, H>(queue: &Q, handler: &H, entry: QueuedContinuation)
where
    Q: ContinuationQueue + ?Sized,
    H: ContinuationHandler + ?Sized,
{
    let run_id = entry.payload.run_id();
    debug!(entry = %entry.id, run_id = %run_id, attempts = entry.attempts, "handling continuation");

    let settled = match handler.handle(entry.payload).await {
        Ok(Handled::Done) => queue.complete(entry.id).await,
        Ok(Handled::RetryAt(until)) => {
            debug!(entry = %entry.id, run_id = %run_id, retry_at = %until, "continuation deferred");
            queue.defer(entry.id, until).await
        }
        Err(e) => {
            warn!(entry = %entry.id, run_id = %run_id, error = %e, "continuation failed");
            queue.fail(entry.id, &e.to_string()).await
        }
    };

    if let Err(e) = settled {
        error!(entry = %entry.id, error = %e, "could not settle queue entry");
    }
}

/// Builder for a [`ContinuationWorker`].
pub struct ContinuationWorkerBuilder<Q: ContinuationQueue, H: ContinuationHandler> {
    queue: Arc<Q>,
    handler: Arc<H>,
    poll_interval: Duration,
    max_concurrent: usize,
}

impl<Q, H> ContinuationWorkerBuilder<Q, H>
where
    Q: ContinuationQueue + 'static,
    H: ContinuationHandler + 'static,
{
    pub fn new(queue: Arc<Q>, handler: Arc<H>) -> Self {
        Self {
            queue,
            handler,
            poll_interval: Duration::from_secs(1),
            max_concurrent: 1,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// At least one.
    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n.max(1);
        self
    }

    pub fn build(self) -> ContinuationWorker<Q, H> {
        ContinuationWorker {
            queue: self.queue,
            handler: self.handler,
            poll_interval: self.poll_interval,
            max_concurrent: self.max_concurrent,
        }
    }
}
