//! Per-document task serializer.
//!
//! Each document owns a FIFO queue of asynchronous tasks drained by a
//! dedicated worker: exactly one task runs at a time, tasks for different
//! documents run in parallel. Enqueueing returns a receiver that resolves
//! with the task's result; a failed task resolves its receiver with the
//! error and the worker moves on to the next task, so one failure never
//! poisons the chain.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};

use crate::error::{DocsyncError, Result};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// FIFO chain of async tasks for one document.
///
/// Must be created inside a tokio runtime; the worker task lives until the
/// queue is dropped, then finishes the jobs already enqueued and exits.
pub(crate) struct TaskQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl TaskQueue {
    pub(crate) fn new(doc_id: &str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let id = doc_id.to_string();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
            log::debug!("task queue for '{id}' closed");
        });
        Self { tx }
    }

    /// Enqueue a task. The returned receiver resolves once the task has
    /// run; if the queue is already closed the receiver resolves with an
    /// error immediately.
    pub(crate) fn enqueue<F, T>(&self, task: F) -> oneshot::Receiver<Result<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let result = task.await;
            // The caller may have dropped its receiver (fire-and-forget).
            let _ = done_tx.send(result);
        });
        let _ = self.tx.send(job);
        done_rx
    }

    /// Enqueue a task and wait for its result.
    pub(crate) async fn run<F, T>(&self, task: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        match self.enqueue(task).await {
            Ok(result) => result,
            Err(_) => Err(DocsyncError::QueueClosed),
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue").finish_non_exhaustive()
    }
}
