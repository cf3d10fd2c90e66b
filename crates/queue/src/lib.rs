mod concurrency;
mod job;
mod store;
mod worker;

pub use concurrency::ConcurrencyGuard;
pub use job::{Job, JobStatus, QueueName};
pub use store::QueueStore;
pub use worker::WorkerPool;
