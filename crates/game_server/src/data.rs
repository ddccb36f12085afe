//! Asynchronous persistence task queue.
//!
//! Actors never talk to storage directly; they submit a [`DatabaseTask`]
//! with a completion callback. Tasks run on a small worker pool, failures
//! come back as failure *results* — never as panics or errors thrown
//! across the async boundary — and the callback fires on the worker, so a
//! caller that needs the result inside its own actor must redispatch it
//! onto its agent's channel itself. The queue knows nothing about agent
//! affinity on purpose.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

const DATA_QUEUE_CAPACITY: usize = 4096;

/// Result of one storage operation.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// Operation completed; payload is operation-specific JSON.
    Success(serde_json::Value),
    /// Operation failed; the message is for logs and retry decisions.
    Failure(String),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// One storage operation, run on a worker thread.
pub trait DatabaseTask: Send + 'static {
    fn run(&mut self) -> TaskOutcome;
}

/// Blanket impl so closures can be submitted directly.
impl<F> DatabaseTask for F
where
    F: FnMut() -> TaskOutcome + Send + 'static,
{
    fn run(&mut self) -> TaskOutcome {
        self()
    }
}

/// Completion callback; invoked on the worker.
pub type TaskCallback = Box<dyn FnOnce(TaskOutcome) + Send>;

struct Job {
    task: Box<dyn DatabaseTask>,
    callback: TaskCallback,
}

/// Handle to the persistence worker pool.
#[derive(Clone)]
pub struct DataAccess {
    tx: mpsc::Sender<Job>,
}

impl DataAccess {
    /// Spin up `workers` queue consumers.
    pub fn new(workers: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(DATA_QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(job) = job else { break };
                    run_job(job).await;
                }
                debug!(worker, "data worker stopped");
            });
        }

        Self { tx }
    }

    /// Queue a storage operation with its completion callback.
    ///
    /// A full queue falls back to an awaited send; a closed queue reports
    /// failure straight to the callback.
    pub async fn submit(&self, task: Box<dyn DatabaseTask>, callback: TaskCallback) {
        let job = Job { task, callback };
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                if let Err(mpsc::error::SendError(job)) = self.tx.send(job).await {
                    (job.callback)(TaskOutcome::Failure("data access stopped".into()));
                }
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                (job.callback)(TaskOutcome::Failure("data access stopped".into()));
            }
        }
    }
}

async fn run_job(job: Job) {
    let Job { mut task, callback } = job;

    // Storage drivers block; keep them off the reactor threads.
    let outcome = tokio::task::spawn_blocking(move || {
        catch_unwind(AssertUnwindSafe(|| task.run()))
            .unwrap_or_else(|_| TaskOutcome::Failure("storage task panicked".into()))
    })
    .await
    .unwrap_or_else(|_| TaskOutcome::Failure("storage task aborted".into()));

    if let TaskOutcome::Failure(reason) = &outcome {
        warn!(reason, "storage task failed");
    }
    callback(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test(flavor = "multi_thread")]
    async fn callback_receives_success() {
        let data = DataAccess::new(2);
        let (tx, rx) = oneshot::channel();

        data.submit(
            Box::new(|| TaskOutcome::Success(serde_json::json!({"rows": 3}))),
            Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        )
        .await;

        let outcome = rx.await.expect("callback ran");
        assert!(outcome.is_success());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panicking_task_reports_failure_not_crash() {
        let data = DataAccess::new(1);
        let (tx, rx) = oneshot::channel();

        data.submit(
            Box::new(|| -> TaskOutcome { panic!("driver exploded") }),
            Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        )
        .await;

        let outcome = rx.await.expect("callback ran");
        assert!(matches!(outcome, TaskOutcome::Failure(_)));

        // The pool survives a panicked task.
        let (tx, rx) = oneshot::channel();
        data.submit(
            Box::new(|| TaskOutcome::Success(serde_json::Value::Null)),
            Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        )
        .await;
        assert!(rx.await.expect("callback ran").is_success());
    }
}
