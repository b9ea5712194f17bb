//! Redis-backed queue. Every state transition runs as a single Lua script.
//!
//! Keys, all under `{name}`, with job ids being video ids:
//! - `:job:{id}` hash with `payload`, `opts`, `max_attempts`, `attempts_made`, `failed_reason`
//! - `:wait` list of ready ids
//! - `:delayed` sorted set of ids scored by due time (ms)
//! - `:active` set of ids currently reserved
//! - `:lock:{id}` `{consumer}:{token}`, expiring after the lock duration
//! - `:dead` list of dead-lettered ids

use super::{
    Delivery, EnqueueOutcome, FailOutcome, JobOptions, JobQueue, QueueError, QueueResult, StalledReport, job_id,
    lock_token,
};
use crate::infrastructure::redis::client::RedisService;
use crate::modules::video::events::TranscodeJob;
use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

// Returns 0 when a live job for the id exists. A dead one is replaced.
const ENQUEUE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  if redis.call('LREM', KEYS[3], 0, ARGV[1]) == 0 then
    return 0
  end
  redis.call('DEL', KEYS[1])
end
redis.call('HSET', KEYS[1], 'payload', ARGV[2], 'opts', ARGV[3], 'max_attempts', ARGV[4],
  'attempts_made', 0, 'created_at', ARGV[5])
redis.call('RPUSH', KEYS[2], ARGV[1])
return 1
"#;

const RESERVE: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[2], id)
  redis.call('RPUSH', KEYS[1], id)
end
local id = redis.call('LPOP', KEYS[1])
if not id then
  return nil
end
local job = ARGV[4] .. ':job:' .. id
redis.call('SET', ARGV[4] .. ':lock:' .. id, ARGV[3], 'PX', ARGV[2])
redis.call('SADD', KEYS[3], id)
local attempts = redis.call('HINCRBY', job, 'attempts_made', 1)
local payload = redis.call('HGET', job, 'payload') or ''
local opts = redis.call('HGET', job, 'opts') or ''
return {id, payload, opts, attempts}
"#;

const EXTEND: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

const COMPLETE: &str = r#"
if redis.call('GET', KEYS[1]) ~= ARGV[1] then
  return 0
end
redis.call('DEL', KEYS[1])
redis.call('SREM', KEYS[2], ARGV[2])
redis.call('DEL', KEYS[3])
return 1
"#;

// ARGV[3] is the retry due time in ms, or -1 to dead-letter.
const FAIL: &str = r#"
if redis.call('GET', KEYS[1]) ~= ARGV[1] then
  return 0
end
redis.call('DEL', KEYS[1])
redis.call('SREM', KEYS[2], ARGV[2])
redis.call('HSET', KEYS[3], 'failed_reason', ARGV[4])
if tonumber(ARGV[3]) >= 0 then
  redis.call('ZADD', KEYS[4], ARGV[3], ARGV[2])
else
  redis.call('RPUSH', KEYS[5], ARGV[2])
end
return 1
"#;

const RECOVER_STALLED: &str = r#"
local ids = redis.call('SMEMBERS', KEYS[1])
local requeued = 0
local dead = {}
for _, id in ipairs(ids) do
  if redis.call('EXISTS', ARGV[1] .. ':lock:' .. id) == 0 then
    redis.call('SREM', KEYS[1], id)
    local job = ARGV[1] .. ':job:' .. id
    local made = tonumber(redis.call('HGET', job, 'attempts_made') or '0')
    local max = tonumber(redis.call('HGET', job, 'max_attempts') or '1')
    if made >= max then
      redis.call('HSET', job, 'failed_reason', 'job stalled more than allowable limit')
      redis.call('RPUSH', KEYS[3], id)
      table.insert(dead, redis.call('HGET', job, 'payload') or '')
    else
      redis.call('RPUSH', KEYS[2], id)
      requeued = requeued + 1
    end
  end
end
return {requeued, dead}
"#;

pub struct RedisJobQueue {
    redis: RedisService,
    name: String,
    enqueue: Script,
    reserve: Script,
    extend: Script,
    complete: Script,
    fail: Script,
    recover_stalled: Script,
}

impl RedisJobQueue {
    pub fn new(redis: RedisService, name: impl Into<String>) -> Self {
        Self {
            redis,
            name: name.into(),
            enqueue: Script::new(ENQUEUE),
            reserve: Script::new(RESERVE),
            extend: Script::new(EXTEND),
            complete: Script::new(COMPLETE),
            fail: Script::new(FAIL),
            recover_stalled: Script::new(RECOVER_STALLED),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.name, suffix)
    }

    fn job_key(&self, id: &str) -> String {
        format!("{}:job:{}", self.name, id)
    }

    fn lock_key(&self, id: &str) -> String {
        format!("{}:lock:{}", self.name, id)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: &TranscodeJob, options: JobOptions) -> QueueResult<EnqueueOutcome> {
        let id = job_id(job);
        let payload = serde_json::to_string(job)?;
        let opts = serde_json::to_string(&options)?;

        let mut conn = self.redis.conn();
        let added: i64 = self
            .enqueue
            .key(self.job_key(&id))
            .key(self.key("wait"))
            .key(self.key("dead"))
            .arg(&id)
            .arg(payload)
            .arg(opts)
            .arg(options.max_attempts)
            .arg(now_ms())
            .invoke_async(&mut conn)
            .await?;

        if added == 1 {
            info!(job_id = %id, "Enqueued job");
            Ok(EnqueueOutcome::Added)
        } else {
            debug!(job_id = %id, "Job already queued");
            Ok(EnqueueOutcome::AlreadyQueued)
        }
    }

    async fn reserve(&self, consumer: &str, lock: Duration) -> QueueResult<Option<Delivery>> {
        let mut conn = self.redis.conn();
        let token = lock_token(consumer);

        let reserved: Option<(String, String, String, u32)> = self
            .reserve
            .key(self.key("wait"))
            .key(self.key("delayed"))
            .key(self.key("active"))
            .arg(now_ms())
            .arg(lock.as_millis() as u64)
            .arg(&token)
            .arg(&self.name)
            .invoke_async(&mut conn)
            .await?;

        let Some((id, payload, opts, attempt)) = reserved else {
            return Ok(None);
        };
        if payload.is_empty() {
            return Err(QueueError::JobNotFound(id));
        }

        let delivery = Delivery {
            job: serde_json::from_str(&payload)?,
            options: serde_json::from_str(&opts)?,
            id,
            attempt,
            token,
        };
        debug!(job_id = %delivery.id, attempt = delivery.attempt, "Reserved job");
        Ok(Some(delivery))
    }

    async fn extend_lock(&self, delivery: &Delivery, lock: Duration) -> QueueResult<bool> {
        let mut conn = self.redis.conn();
        let extended: i64 = self
            .extend
            .key(self.lock_key(&delivery.id))
            .arg(&delivery.token)
            .arg(lock.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    async fn complete(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut conn = self.redis.conn();
        let done: i64 = self
            .complete
            .key(self.lock_key(&delivery.id))
            .key(self.key("active"))
            .key(self.job_key(&delivery.id))
            .arg(&delivery.token)
            .arg(&delivery.id)
            .invoke_async(&mut conn)
            .await?;

        if done == 1 {
            Ok(())
        } else {
            Err(QueueError::LockLost(delivery.id.clone()))
        }
    }

    async fn fail(&self, delivery: &Delivery, reason: &str, retryable: bool) -> QueueResult<FailOutcome> {
        let retry_delay = delivery.retry_delay(retryable);
        let due_at: i64 = match retry_delay {
            Some(delay) => (now_ms() + delay.as_millis() as u64) as i64,
            None => -1,
        };

        let mut conn = self.redis.conn();
        let done: i64 = self
            .fail
            .key(self.lock_key(&delivery.id))
            .key(self.key("active"))
            .key(self.job_key(&delivery.id))
            .key(self.key("delayed"))
            .key(self.key("dead"))
            .arg(&delivery.token)
            .arg(&delivery.id)
            .arg(due_at)
            .arg(reason)
            .invoke_async(&mut conn)
            .await?;

        if done != 1 {
            return Err(QueueError::LockLost(delivery.id.clone()));
        }

        Ok(match retry_delay {
            Some(delay) => FailOutcome::Retrying { delay },
            None => {
                warn!(job_id = %delivery.id, "Job moved to dead letters: {}", reason);
                FailOutcome::Dead
            }
        })
    }

    async fn recover_stalled(&self) -> QueueResult<StalledReport> {
        let mut conn = self.redis.conn();
        let (requeued, dead): (usize, Vec<String>) = self
            .recover_stalled
            .key(self.key("active"))
            .key(self.key("wait"))
            .key(self.key("dead"))
            .arg(&self.name)
            .invoke_async(&mut conn)
            .await?;

        let mut report = StalledReport {
            requeued,
            dead: Vec::with_capacity(dead.len()),
        };
        for payload in dead {
            match serde_json::from_str::<TranscodeJob>(&payload) {
                Ok(job) => report.dead.push(job),
                Err(e) => warn!("Dead-lettered stalled job has unreadable payload: {}", e),
            }
        }

        if report.requeued > 0 || !report.dead.is_empty() {
            warn!(requeued = report.requeued, dead = report.dead.len(), "Recovered stalled jobs");
        }
        Ok(report)
    }

    async fn next_delayed_in(&self) -> QueueResult<Option<Duration>> {
        let mut conn = self.redis.conn();
        let head: Vec<(String, f64)> = conn.zrange_withscores(self.key("delayed"), 0, 0).await?;

        Ok(head.first().map(|(_, due_at)| {
            let due_at = due_at.max(0.0) as u64;
            Duration::from_millis(due_at.saturating_sub(now_ms()))
        }))
    }
}

// These run against a real server: `REDIS_URL=redis://... cargo test -- --ignored`.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::queue::Backoff;
    use uuid::Uuid;

    const LOCK: Duration = Duration::from_secs(30);

    async fn queue() -> RedisJobQueue {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let redis = RedisService::new(&url).await.unwrap();
        RedisJobQueue::new(redis, format!("test-queue-{}", Uuid::new_v4().simple()))
    }

    async fn cleanup(queue: &RedisJobQueue) {
        let mut conn = queue.redis.conn();
        let keys: Vec<String> = conn.keys(format!("{}:*", queue.name)).await.unwrap();
        if !keys.is_empty() {
            let _: () = conn.del(keys).await.unwrap();
        }
    }

    fn job() -> TranscodeJob {
        TranscodeJob::new(Uuid::new_v4(), "raw/abc/clip.mp4")
    }

    fn fast(max_attempts: u32) -> JobOptions {
        JobOptions {
            max_attempts,
            backoff: Backoff::Exponential { base_delay_ms: 50 },
        }
    }

    #[tokio::test]
    #[ignore = "needs a Redis server at REDIS_URL"]
    async fn reserve_is_single_flight_and_enqueue_dedupes_live_jobs() {
        let queue = queue().await;
        let job = job();

        assert_eq!(queue.enqueue(&job, fast(3)).await.unwrap(), EnqueueOutcome::Added);
        assert_eq!(queue.enqueue(&job, fast(3)).await.unwrap(), EnqueueOutcome::AlreadyQueued);

        let first = queue.reserve("worker-a", LOCK).await.unwrap().unwrap();
        assert_eq!(first.id, job.video_id.to_string());
        assert_eq!(first.job, job);
        assert_eq!(first.attempt, 1);
        assert_eq!(first.options, fast(3));
        assert!(queue.reserve("worker-b", LOCK).await.unwrap().is_none());
        assert_eq!(queue.enqueue(&job, fast(3)).await.unwrap(), EnqueueOutcome::AlreadyQueued);

        queue.complete(&first).await.unwrap();
        assert_eq!(queue.enqueue(&job, fast(3)).await.unwrap(), EnqueueOutcome::Added);

        cleanup(&queue).await;
    }

    #[tokio::test]
    #[ignore = "needs a Redis server at REDIS_URL"]
    async fn failures_back_off_then_dead_letter() {
        let queue = queue().await;
        let job = job();
        queue.enqueue(&job, fast(3)).await.unwrap();

        let first = queue.reserve("w", LOCK).await.unwrap().unwrap();
        assert_eq!(
            queue.fail(&first, "exit 1", true).await.unwrap(),
            FailOutcome::Retrying { delay: Duration::from_millis(50) }
        );
        let due = queue.next_delayed_in().await.unwrap().unwrap();
        assert!(due <= Duration::from_millis(50));
        assert!(queue.reserve("w", LOCK).await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(80)).await;
        let second = queue.reserve("w", LOCK).await.unwrap().unwrap();
        assert_eq!(second.attempt, 2);
        assert_eq!(
            queue.fail(&second, "exit 1", true).await.unwrap(),
            FailOutcome::Retrying { delay: Duration::from_millis(100) }
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        let third = queue.reserve("w", LOCK).await.unwrap().unwrap();
        assert_eq!(third.attempt, 3);
        assert_eq!(queue.fail(&third, "exit 1", true).await.unwrap(), FailOutcome::Dead);
        assert_eq!(queue.next_delayed_in().await.unwrap(), None);
        assert!(queue.reserve("w", LOCK).await.unwrap().is_none());

        assert_eq!(queue.enqueue(&job, fast(3)).await.unwrap(), EnqueueOutcome::Added);
        assert_eq!(queue.reserve("w", LOCK).await.unwrap().unwrap().attempt, 1);

        cleanup(&queue).await;
    }

    #[tokio::test]
    #[ignore = "needs a Redis server at REDIS_URL"]
    async fn non_retryable_failure_skips_backoff() {
        let queue = queue().await;
        queue.enqueue(&job(), fast(3)).await.unwrap();

        let delivery = queue.reserve("w", LOCK).await.unwrap().unwrap();
        assert_eq!(queue.fail(&delivery, "script missing", false).await.unwrap(), FailOutcome::Dead);
        assert_eq!(queue.next_delayed_in().await.unwrap(), None);

        cleanup(&queue).await;
    }

    #[tokio::test]
    #[ignore = "needs a Redis server at REDIS_URL"]
    async fn expired_lock_is_recovered_and_old_holder_fenced() {
        let queue = queue().await;
        queue.enqueue(&job(), fast(3)).await.unwrap();

        let stale = queue.reserve("worker-a", Duration::from_millis(100)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(!queue.extend_lock(&stale, LOCK).await.unwrap());
        let report = queue.recover_stalled().await.unwrap();
        assert_eq!(report, StalledReport { requeued: 1, dead: vec![] });

        let fresh = queue.reserve("worker-b", LOCK).await.unwrap().unwrap();
        assert_eq!(fresh.attempt, 2);
        assert!(fresh.token.starts_with("worker-b:"));

        assert!(matches!(queue.complete(&stale).await, Err(QueueError::LockLost(_))));
        assert!(matches!(queue.fail(&stale, "late", true).await, Err(QueueError::LockLost(_))));
        queue.complete(&fresh).await.unwrap();
        assert_eq!(queue.recover_stalled().await.unwrap(), StalledReport::default());

        cleanup(&queue).await;
    }

    #[tokio::test]
    #[ignore = "needs a Redis server at REDIS_URL"]
    async fn renewed_lock_is_not_stalled() {
        let queue = queue().await;
        queue.enqueue(&job(), fast(3)).await.unwrap();
        let lock = Duration::from_millis(200);
        let delivery = queue.reserve("w", lock).await.unwrap().unwrap();

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(queue.extend_lock(&delivery, lock).await.unwrap());
            assert_eq!(queue.recover_stalled().await.unwrap(), StalledReport::default());
        }
        queue.complete(&delivery).await.unwrap();

        cleanup(&queue).await;
    }

    #[tokio::test]
    #[ignore = "needs a Redis server at REDIS_URL"]
    async fn stall_on_last_attempt_reports_the_job_dead() {
        let queue = queue().await;
        let job = job();
        queue.enqueue(&job, fast(1)).await.unwrap();
        queue.reserve("w", Duration::from_millis(50)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let report = queue.recover_stalled().await.unwrap();
        assert_eq!(report, StalledReport { requeued: 0, dead: vec![job] });
        assert!(queue.reserve("w", LOCK).await.unwrap().is_none());

        cleanup(&queue).await;
    }
}
