//! Bounded worker pool — one semaphore per named queue, sized to
//! `workerConcurrency`. Uses per-queue semaphores (acquire-then-spawn, permit
//! held for the task's lifetime) rather than per-session ones, since run
//! ownership here is enforced by the store's conditional claim, not by
//! task-runner bookkeeping.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::job::{Job, QueueName};
use crate::store::QueueStore;

pub struct WorkerPool {
    semaphores: HashMap<QueueName, Arc<Semaphore>>,
}

impl WorkerPool {
    pub fn new(worker_concurrency: usize) -> Self {
        let cap = worker_concurrency.max(1);
        let semaphores = QueueName::ALL
            .into_iter()
            .map(|q| (q, Arc::new(Semaphore::new(cap))))
            .collect();
        Self { semaphores }
    }

    pub fn available_permits(&self, queue: QueueName) -> usize {
        self.semaphores[&queue].available_permits()
    }

    /// Acquire a permit for `queue`, then dispatch the next visible job to
    /// `handler` on its own task. The permit is held until the handler
    /// finishes, bounding in-flight work at `workerConcurrency`. On handler
    /// error the job is marked `failed` with the error text retained for
    /// inspection. Returns `false` when the queue had nothing visible, so
    /// polling callers can back off instead of spinning.
    pub async fn dispatch_one<F, Fut>(&self, store: &Arc<QueueStore>, queue: QueueName, handler: F) -> bool
    where
        F: FnOnce(Job) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let semaphore = self.semaphores[&queue].clone();
        let permit = semaphore
            .acquire_owned()
            .await
            .expect("queue semaphore is never closed");

        let Some(job) = store.dequeue(queue).await else {
            drop(permit);
            return false;
        };

        let store = store.clone();
        tokio::spawn(async move {
            let job_id = job.id;
            let job_for_error = job.clone();
            if let Err(err) = handler(job).await {
                tracing::warn!(job_id = %job_id, error = %err, "queue job failed");
                store.mark_failed(job_for_error, err);
            }
            drop(permit);
        });
        true
    }
}
