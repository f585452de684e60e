//! Job and queue definitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::NotificationKind;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Fixed set of queues. Each queue gets its own dispatcher, concurrency
/// limit and rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    PositionPoll,
    StatusRefresh,
    NotificationDispatch,
    DataSync,
}

impl QueueName {
    pub const ALL: [QueueName; 4] = [
        QueueName::PositionPoll,
        QueueName::StatusRefresh,
        QueueName::NotificationDispatch,
        QueueName::DataSync,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::PositionPoll => "position-poll",
            QueueName::StatusRefresh => "status-refresh",
            QueueName::NotificationDispatch => "notification-dispatch",
            QueueName::DataSync => "data-sync",
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work item, one variant per queue.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPayload {
    PositionPoll {
        train_number: String,
    },
    StatusRefresh {
        pnr: String,
        user_id: String,
    },
    NotificationDispatch {
        user_id: String,
        kind: NotificationKind,
        title: String,
        body: String,
        data: Value,
    },
    DataSync {
        scope: String,
    },
}

impl JobPayload {
    /// The queue this payload belongs on.
    pub fn queue(&self) -> QueueName {
        match self {
            JobPayload::PositionPoll { .. } => QueueName::PositionPoll,
            JobPayload::StatusRefresh { .. } => QueueName::StatusRefresh,
            JobPayload::NotificationDispatch { .. } => QueueName::NotificationDispatch,
            JobPayload::DataSync { .. } => QueueName::DataSync,
        }
    }
}

/// Per-job overrides. `Default` matches the production settings: three
/// attempts with a two-second exponential backoff base, no initial delay.
#[derive(Debug, Clone)]
pub struct JobOptions {
    pub delay: Option<Duration>,
    pub attempts: u32,
    pub backoff_base: Duration,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            delay: None,
            attempts: DEFAULT_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl JobOptions {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub queue: QueueName,
    pub name: String,
    pub payload: JobPayload,
    /// Attempts already started, 1-based while processing.
    pub attempt: u32,
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Job {
    pub fn new(queue: QueueName, name: impl Into<String>, payload: JobPayload, opts: &JobOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue,
            name: name.into(),
            payload,
            attempt: 0,
            max_attempts: opts.attempts.max(1),
            backoff_base: opts.backoff_base,
        }
    }

    /// Delay before the next retry: `backoff_base * 2^(attempt - 1)`.
    pub fn retry_delay(&self) -> Duration {
        let exponent = self.attempt.saturating_sub(1).min(16);
        self.backoff_base * 2u32.pow(exponent)
    }
}

/// Job that exhausted its attempts, kept in a bounded ring for inspection.
#[derive(Debug, Clone)]
pub struct DeadJob {
    pub job: Job,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// One processor is registered per queue and owns that queue's semantics.
/// Errors trigger the retry path; panics are treated as errors too since
/// each attempt runs in its own task.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, job: &Job) -> anyhow::Result<()>;
}
