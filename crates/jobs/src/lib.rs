//! In-process job queues with retries, rate limiting and repeat schedules.
//!
//! Each queue runs one dispatcher task that pulls jobs off an unbounded
//! channel, takes a concurrency permit and a rate-limiter token, then hands
//! the job to the queue's [`Processor`]. Failed jobs are re-enqueued with
//! exponential backoff until `max_attempts`, after which they land in a
//! bounded dead set for inspection.

mod error;
mod job;
mod limiter;
mod service;

pub use error::{JobError, Result};
pub use job::{DeadJob, Job, JobOptions, JobPayload, Processor, QueueName};
pub use limiter::TokenBucket;
pub use service::{QueueService, QueueServiceConfig};
