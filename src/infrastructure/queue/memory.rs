//! Process-local queue with the same delivery semantics as the Redis backend.
//! Nothing survives a restart, so it is meant for tests and local runs.

use super::{
    Delivery, EnqueueOutcome, FailOutcome, JobOptions, JobQueue, QueueError, QueueResult, StalledReport, job_id,
    lock_token,
};
use crate::modules::video::events::TranscodeJob;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

struct StoredJob {
    job: TranscodeJob,
    options: JobOptions,
    attempts_made: u32,
    failed_reason: Option<String>,
}

struct Lease {
    token: String,
    consumer: String,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    jobs: HashMap<String, StoredJob>,
    wait: VecDeque<String>,
    delayed: Vec<(Instant, String)>,
    active: HashMap<String, Lease>,
    dead: Vec<String>,
}

impl State {
    fn promote_due(&mut self, now: Instant) {
        let mut due = Vec::new();
        self.delayed.retain(|(at, id)| {
            if *at <= now {
                due.push((*at, id.clone()));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(at, _)| *at);
        self.wait.extend(due.into_iter().map(|(_, id)| id));
    }

    fn is_dead(&self, id: &str) -> bool {
        self.dead.iter().any(|dead| dead == id)
    }

    fn holds(&self, delivery: &Delivery, now: Instant) -> bool {
        self.active
            .get(&delivery.id)
            .is_some_and(|lease| lease.token == delivery.token && lease.expires_at > now)
    }
}

#[derive(Default)]
pub struct InMemoryQueue {
    state: Mutex<State>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn enqueue(&self, job: &TranscodeJob, options: JobOptions) -> QueueResult<EnqueueOutcome> {
        let id = job_id(job);
        let mut state = self.state.lock().await;

        if state.jobs.contains_key(&id) {
            if !state.is_dead(&id) {
                debug!(job_id = %id, "Job already queued");
                return Ok(EnqueueOutcome::AlreadyQueued);
            }
            state.dead.retain(|dead| *dead != id);
        }

        state.jobs.insert(
            id.clone(),
            StoredJob {
                job: job.clone(),
                options,
                attempts_made: 0,
                failed_reason: None,
            },
        );
        state.wait.push_back(id.clone());

        debug!(job_id = %id, "Enqueued job");
        Ok(EnqueueOutcome::Added)
    }

    async fn reserve(&self, consumer: &str, lock: Duration) -> QueueResult<Option<Delivery>> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.promote_due(now);

        let Some(id) = state.wait.pop_front() else {
            return Ok(None);
        };

        let stored = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| QueueError::JobNotFound(id.clone()))?;
        stored.attempts_made += 1;

        let delivery = Delivery {
            id: id.clone(),
            job: stored.job.clone(),
            attempt: stored.attempts_made,
            options: stored.options,
            token: lock_token(consumer),
        };

        state.active.insert(
            id,
            Lease {
                token: delivery.token.clone(),
                consumer: consumer.to_string(),
                expires_at: now + lock,
            },
        );

        Ok(Some(delivery))
    }

    async fn extend_lock(&self, delivery: &Delivery, lock: Duration) -> QueueResult<bool> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        if !state.holds(delivery, now) {
            return Ok(false);
        }
        if let Some(lease) = state.active.get_mut(&delivery.id) {
            lease.expires_at = now + lock;
        }
        Ok(true)
    }

    async fn complete(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        if !state.holds(delivery, Instant::now()) {
            return Err(QueueError::LockLost(delivery.id.clone()));
        }
        state.active.remove(&delivery.id);
        state.jobs.remove(&delivery.id);
        Ok(())
    }

    async fn fail(&self, delivery: &Delivery, reason: &str, retryable: bool) -> QueueResult<FailOutcome> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        if !state.holds(delivery, now) {
            return Err(QueueError::LockLost(delivery.id.clone()));
        }
        state.active.remove(&delivery.id);
        if let Some(stored) = state.jobs.get_mut(&delivery.id) {
            stored.failed_reason = Some(reason.to_string());
        }

        match delivery.retry_delay(retryable) {
            Some(delay) => {
                state.delayed.push((now + delay, delivery.id.clone()));
                Ok(FailOutcome::Retrying { delay })
            }
            None => {
                state.dead.push(delivery.id.clone());
                Ok(FailOutcome::Dead)
            }
        }
    }

    async fn recover_stalled(&self) -> QueueResult<StalledReport> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        let expired: Vec<String> = state
            .active
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut report = StalledReport::default();
        for id in expired {
            if let Some(lease) = state.active.remove(&id) {
                debug!(job_id = %id, consumer = %lease.consumer, "Lock expired");
            }
            let Some(stored) = state.jobs.get_mut(&id) else {
                continue;
            };

            if stored.attempts_made >= stored.options.max_attempts {
                stored.failed_reason = Some("job stalled more than allowable limit".to_string());
                report.dead.push(stored.job.clone());
                state.dead.push(id);
            } else {
                state.wait.push_back(id);
                report.requeued += 1;
            }
        }

        if report.requeued > 0 || !report.dead.is_empty() {
            warn!(requeued = report.requeued, dead = report.dead.len(), "Recovered stalled jobs");
        }
        Ok(report)
    }

    async fn next_delayed_in(&self) -> QueueResult<Option<Duration>> {
        let now = Instant::now();
        let state = self.state.lock().await;
        Ok(state
            .delayed
            .iter()
            .map(|(at, _)| at.saturating_duration_since(now))
            .min())
    }
}

#[cfg(test)]
impl InMemoryQueue {
    /// Dead-lettered jobs with the reason of their last failure.
    pub async fn dead_letters(&self) -> Vec<(TranscodeJob, Option<String>)> {
        let state = self.state.lock().await;
        state
            .dead
            .iter()
            .filter_map(|id| state.jobs.get(id))
            .map(|stored| (stored.job.clone(), stored.failed_reason.clone()))
            .collect()
    }

    pub async fn is_drained(&self) -> bool {
        let state = self.state.lock().await;
        state.wait.is_empty() && state.delayed.is_empty() && state.active.is_empty()
    }
}
