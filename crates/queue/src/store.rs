//! Durable (in-process) queue storage for the five named queues.
//!
//! Visibility delay is modelled with one `DelayQueue` per named queue;
//! `enqueue` schedules a job at `visible_at - now`, `dequeue` takes the
//! next already-expired entry, polling in short ticks while entries exist
//! but none are due — no lock is ever held across an await, so a consumer
//! parked on a delayed job never blocks producers. Failures leave the job
//! retained with `status: failed` and the error text — retry is the
//! caller's decision (`requeue` re-admits it with a fresh delay and an
//! incremented attempt count).

use std::collections::HashMap;
use std::task::Poll;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio_util::time::DelayQueue;
use uuid::Uuid;

use crate::job::{Job, JobStatus, QueueName};

/// Poll granularity while a queue holds only not-yet-visible jobs.
const DELAY_POLL_TICK: Duration = Duration::from_millis(10);

enum PollOutcome {
    Expired(Uuid),
    Empty,
    NotYetDue,
}

pub struct QueueStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
    delays: Mutex<HashMap<QueueName, DelayQueue<Uuid>>>,
}

impl Default for QueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueStore {
    pub fn new() -> Self {
        let delays = QueueName::ALL.into_iter().map(|q| (q, DelayQueue::new())).collect();
        Self {
            jobs: RwLock::new(HashMap::new()),
            delays: Mutex::new(delays),
        }
    }

    /// Admit a job. Becomes eligible for `dequeue` once its delay elapses.
    pub async fn enqueue(&self, job: Job) {
        let queue = job.queue;
        let id = job.id;
        let delay = (job.visible_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        self.jobs.write().insert(id, job);

        let mut delays = self.delays.lock();
        let dq = delays
            .get_mut(&queue)
            .expect("QueueStore::new pre-populates all QueueName::ALL entries");
        dq.insert(id, delay);
    }

    fn poll_queue(&self, queue: QueueName) -> PollOutcome {
        let mut delays = self.delays.lock();
        let Some(dq) = delays.get_mut(&queue) else {
            return PollOutcome::Empty;
        };
        let mut outcome = PollOutcome::NotYetDue;
        // One manual poll: Ready(Some) = an entry expired, Ready(None) =
        // queue empty, Pending = entries exist but none are due yet.
        futures_util::future::FutureExt::now_or_never(futures_util::future::poll_fn(|cx| {
            match dq.poll_expired(cx) {
                Poll::Ready(Some(expired)) => {
                    outcome = PollOutcome::Expired(expired.into_inner());
                    Poll::Ready(())
                }
                Poll::Ready(None) => {
                    outcome = PollOutcome::Empty;
                    Poll::Ready(())
                }
                Poll::Pending => {
                    outcome = PollOutcome::NotYetDue;
                    Poll::Ready(())
                }
            }
        }));
        outcome
    }

    /// Remove and return the next visible job on `queue`, or `None` when
    /// the queue is empty. Waits (in short ticks, lock released) while jobs
    /// exist but none have reached their fire time yet.
    pub async fn dequeue(&self, queue: QueueName) -> Option<Job> {
        loop {
            match self.poll_queue(queue) {
                PollOutcome::Expired(id) => return self.jobs.write().remove(&id),
                PollOutcome::Empty => return None,
                PollOutcome::NotYetDue => tokio::time::sleep(DELAY_POLL_TICK).await,
            }
        }
    }

    /// Re-admit a job after a failed attempt, incrementing its attempt
    /// counter and recording the error. `retry_delay` controls backoff.
    pub async fn requeue(&self, mut job: Job, error: impl Into<String>, retry_delay: Duration) {
        job.attempts += 1;
        job.status = JobStatus::Pending;
        job.last_error = Some(error.into());
        job.visible_at = Utc::now() + chrono::Duration::from_std(retry_delay).unwrap_or_default();
        self.enqueue(job).await;
    }

    /// Mark a job permanently failed (no further retry scheduled) and keep
    /// it queryable for diagnostics.
    pub fn mark_failed(&self, mut job: Job, error: impl Into<String>) {
        job.status = JobStatus::Failed;
        job.last_error = Some(error.into());
        self.jobs.write().insert(job.id, job);
    }

    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().get(&id).cloned()
    }

    /// Count of jobs currently tracked for a queue (pending + failed).
    pub fn depth(&self, queue: QueueName) -> usize {
        self.jobs.read().values().filter(|j| j.queue == queue).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_then_dequeue_round_trip() {
        let store = QueueStore::new();
        let job = Job::new(QueueName::Runs, serde_json::json!({"runId": "a"}), Utc::now());
        let id = job.id;
        store.enqueue(job).await;

        let dequeued = store.dequeue(QueueName::Runs).await.unwrap();
        assert_eq!(dequeued.id, id);
        assert!(store.get(id).is_none());
    }

    #[tokio::test]
    async fn empty_queue_dequeues_none_immediately() {
        let store = QueueStore::new();
        assert!(store.dequeue(QueueName::Runs).await.is_none());
    }

    #[tokio::test]
    async fn delayed_job_is_not_visible_before_fire_time() {
        let store = QueueStore::new();
        let now = Utc::now();
        let job = Job::delayed(
            QueueName::Wake,
            serde_json::json!({}),
            now,
            now + chrono::Duration::milliseconds(50),
        );
        store.enqueue(job).await;

        let result = tokio::time::timeout(Duration::from_millis(5), store.dequeue(QueueName::Wake)).await;
        assert!(result.is_err(), "job should not be visible before its delay elapses");

        let dequeued = store.dequeue(QueueName::Wake).await;
        assert!(dequeued.is_some());
    }

    #[tokio::test]
    async fn waiting_on_a_delayed_job_does_not_block_producers() {
        let store = std::sync::Arc::new(QueueStore::new());
        let now = Utc::now();
        store
            .enqueue(Job::delayed(
                QueueName::Wake,
                serde_json::json!({}),
                now,
                now + chrono::Duration::milliseconds(100),
            ))
            .await;

        let consumer = {
            let store = store.clone();
            tokio::spawn(async move { store.dequeue(QueueName::Wake).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // While the consumer waits on the delayed wake job, another queue
        // accepts work without contention.
        let enqueue = tokio::time::timeout(
            Duration::from_millis(20),
            store.enqueue(Job::new(QueueName::Runs, serde_json::json!({}), Utc::now())),
        )
        .await;
        assert!(enqueue.is_ok(), "enqueue must not block on a parked consumer");

        assert!(consumer.await.unwrap().is_some());
    }

    #[tokio::test]
    async fn queues_are_independent() {
        let store = QueueStore::new();
        store
            .enqueue(Job::new(QueueName::Runs, serde_json::json!({}), Utc::now()))
            .await;
        assert_eq!(store.depth(QueueName::Runs), 1);
        assert_eq!(store.depth(QueueName::Messages), 0);
    }

    #[tokio::test]
    async fn requeue_increments_attempts_and_records_error() {
        let store = QueueStore::new();
        let job = Job::new(QueueName::MemoryWrites, serde_json::json!({}), Utc::now());
        let id = job.id;
        store.enqueue(job).await;
        let dequeued = store.dequeue(QueueName::MemoryWrites).await.unwrap();

        store.requeue(dequeued, "transient failure", Duration::from_millis(1)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let retried = store.dequeue(QueueName::MemoryWrites).await.unwrap();
        assert_eq!(retried.id, id);
        assert_eq!(retried.attempts, 1);
        assert_eq!(retried.last_error.as_deref(), Some("transient failure"));
    }

    #[tokio::test]
    async fn mark_failed_keeps_job_queryable() {
        let store = QueueStore::new();
        let job = Job::new(QueueName::DeliveryAcks, serde_json::json!({}), Utc::now());
        let id = job.id;
        store.enqueue(job).await;
        let dequeued = store.dequeue(QueueName::DeliveryAcks).await.unwrap();

        store.mark_failed(dequeued, "permanent failure");
        let failed = store.get(id).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("permanent failure"));
    }
}
