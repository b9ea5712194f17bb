//! At-least-once job queue with lock-based single-flight delivery.
//!
//! A reserved job is locked to one consumer for a lock duration. The consumer
//! renews the lock while it works, then either completes the job or fails it.
//! Failed jobs come back after their backoff delay until `max_attempts`
//! deliveries have been made, after which they are dead-lettered. A job whose
//! lock expires without renewal is treated as stalled and made deliverable again.
//!
//! Jobs are keyed by video id. While a job for a video is waiting, delayed or
//! active, enqueueing it again is a no-op, so one video never has two live
//! deliveries. A dead-lettered job is replaced by a fresh one.

pub mod memory;
pub mod redis;

use crate::modules::video::events::TranscodeJob;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use memory::InMemoryQueue;
pub use self::redis::RedisJobQueue;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("lock for job {0} is no longer held")]
    LockLost(String),

    #[error("job not found: {0}")]
    JobNotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Backoff {
    #[serde(rename_all = "camelCase")]
    Fixed { delay_ms: u64 },
    #[serde(rename_all = "camelCase")]
    Exponential { base_delay_ms: u64 },
}

impl Backoff {
    /// Delay before the delivery that follows failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { base_delay_ms } => {
                let exp = attempt.saturating_sub(1).min(32);
                Duration::from_millis(base_delay_ms.saturating_mul(1u64 << exp))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential { base_delay_ms: 1000 },
        }
    }
}

/// A job handed to one consumer, valid while its lock token is current.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Queue id, the video id as text.
    pub id: String,
    pub job: TranscodeJob,
    /// 1-based delivery count, including this one.
    pub attempt: u32,
    pub options: JobOptions,
    pub token: String,
}

impl Delivery {
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.options.max_attempts
    }

    /// Backoff before redelivery, or `None` when the job must be dead-lettered.
    pub fn retry_delay(&self, retryable: bool) -> Option<Duration> {
        (retryable && !self.is_final_attempt()).then(|| self.options.backoff.delay_after(self.attempt))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Added,
    /// A live job for the same video already exists; nothing was stored.
    AlreadyQueued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Retrying { delay: Duration },
    Dead,
}

/// Result of one stalled-job sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StalledReport {
    pub requeued: usize,
    /// Jobs that ran out of attempts while stalled.
    pub dead: Vec<TranscodeJob>,
}

/// Queue id of `job`. One live job per video.
pub fn job_id(job: &TranscodeJob) -> String {
    job.video_id.to_string()
}

/// Lock value for one delivery: the holder's name plus a random token.
pub fn lock_token(consumer: &str) -> String {
    format!("{}:{}", consumer, uuid::Uuid::new_v4().simple())
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Durably stores the job under its video id.
    async fn enqueue(&self, job: &TranscodeJob, options: JobOptions) -> QueueResult<EnqueueOutcome>;

    /// Takes the next due job and locks it to `consumer` for `lock`. The
    /// lock records the consumer so a stalled job can be traced to its holder.
    async fn reserve(&self, consumer: &str, lock: Duration) -> QueueResult<Option<Delivery>>;

    /// Renews the lock. `false` means another consumer may now own the job.
    async fn extend_lock(&self, delivery: &Delivery, lock: Duration) -> QueueResult<bool>;

    /// Acknowledges the job; it will never be delivered again.
    async fn complete(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Releases the job for a delayed retry, or dead-letters it when
    /// `retryable` is false or attempts are exhausted.
    async fn fail(&self, delivery: &Delivery, reason: &str, retryable: bool) -> QueueResult<FailOutcome>;

    /// Returns jobs with expired locks to the queue.
    async fn recover_stalled(&self) -> QueueResult<StalledReport>;

    /// Time until the earliest delayed job is due, if any.
    async fn next_delayed_in(&self) -> QueueResult<Option<Duration>>;
}
