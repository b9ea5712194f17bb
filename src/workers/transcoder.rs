use crate::common::artifacts::MASTER_PLAYLIST;
use crate::config::settings::{StorageSettings, WorkerSettings};
use crate::infrastructure::queue::{Delivery, FailOutcome, JobQueue};
use crate::infrastructure::storage::s3::{ArtifactStore, StorageError};
use crate::modules::video::events::TranscodeJob;
use crate::modules::video::repository::{RepositoryError, TranscodeStatusStore};
use crate::workers::executor::{ExecutionError, Executor};
use crate::workers::workdir::{self, WorkDir};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to prepare working directory: {0}")]
    WorkDir(#[source] io::Error),

    #[error("status update failed: {0}")]
    Status(#[from] RepositoryError),

    #[error("download failed: {0}")]
    Download(#[source] StorageError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("upload failed: {0}")]
    Upload(#[source] StorageError),

    #[error("invalid playlist URL: {0}")]
    PlaylistUrl(#[from] url::ParseError),
}

impl PipelineError {
    /// Whether another delivery of the same job could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::WorkDir(_) | PipelineError::PlaylistUrl(_) => false,
            PipelineError::Execution(e) => !e.is_fatal(),
            PipelineError::Status(_) | PipelineError::Download(_) | PipelineError::Upload(_) => true,
        }
    }
}

/// Keeps a delivery's lock alive until dropped.
struct LockRenewal {
    _guard: DropGuard,
}

impl LockRenewal {
    fn start(queue: Arc<dyn JobQueue>, delivery: Delivery, lock: Duration, every: Duration) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let every = every.max(Duration::from_millis(1));

        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
                loop {
                    tokio::select! {
                        _ = cancelled.cancelled() => break,
                        _ = ticker.tick() => match queue.extend_lock(&delivery, lock).await {
                            Ok(true) => debug!("Lock renewed"),
                            Ok(false) => {
                                warn!("Lock lost; the job may be delivered again");
                                break;
                            }
                            Err(e) => warn!("Lock renewal failed: {}", e),
                        },
                    }
                }
            }
            .in_current_span(),
        );

        Self {
            _guard: token.drop_guard(),
        }
    }
}

pub struct TranscodeWorker {
    settings: WorkerSettings,
    storage_settings: StorageSettings,
    consumer: String,
    queue: Arc<dyn JobQueue>,
    statuses: Arc<dyn TranscodeStatusStore>,
    storage: Arc<dyn ArtifactStore>,
    executor: Arc<dyn Executor>,
}

/// Running worker. Dropping it leaves the worker running; call [`WorkerHandle::stop`].
pub struct WorkerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stops taking new jobs and waits for the in-flight ones to finish.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            error!("Transcoder worker task failed: {}", e);
        }
    }
}

impl TranscodeWorker {
    pub fn new(
        settings: WorkerSettings,
        storage_settings: StorageSettings,
        queue: Arc<dyn JobQueue>,
        statuses: Arc<dyn TranscodeStatusStore>,
        storage: Arc<dyn ArtifactStore>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            settings,
            storage_settings,
            consumer: format!("transcoder-{}", Uuid::new_v4().simple()),
            queue,
            statuses,
            storage,
            executor,
        }
    }

    pub fn start(self) -> WorkerHandle {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Arc::new(self).run(shutdown.clone()));
        WorkerHandle { shutdown, task }
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            consumer = %self.consumer,
            concurrency = self.settings.concurrency,
            "🎥 Transcoder worker started"
        );

        match workdir::sweep(&self.settings.temp_root).await {
            Ok(0) => {}
            Ok(removed) => warn!(removed, "Swept working directories left by a previous run"),
            Err(e) => error!(
                "Could not prepare temp root {}: {}",
                self.settings.temp_root.display(),
                e
            ),
        }

        let permits = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut in_flight = JoinSet::new();
        let mut next_stall_check = Instant::now();

        loop {
            if Instant::now() >= next_stall_check {
                self.recover_stalled().await;
                next_stall_check = Instant::now() + self.settings.lock_duration;
            }

            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!("Transcode task failed: {}", e);
                }
            }

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let reserved = match self.queue.reserve(&self.consumer, self.settings.lock_duration).await {
                Ok(reserved) => reserved,
                Err(e) => {
                    error!("Failed to reserve a job: {}", e);
                    None
                }
            };

            match reserved {
                Some(delivery) => {
                    let worker = Arc::clone(&self);
                    in_flight.spawn(async move {
                        worker.handle(delivery).await;
                        drop(permit);
                    });
                }
                None => {
                    drop(permit);
                    let idle = self.idle_wait().await;
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(idle) => {}
                    }
                }
            }
        }

        if !in_flight.is_empty() {
            info!(in_flight = in_flight.len(), "Waiting for in-flight transcodes");
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!("Transcode task failed: {}", e);
            }
        }
        info!("🎥 Transcoder worker stopped");
    }

    /// Sleep until the drain delay passes or the next backoff comes due.
    async fn idle_wait(&self) -> Duration {
        match self.queue.next_delayed_in().await {
            Ok(Some(due)) => due.min(self.settings.drain_delay),
            Ok(None) => self.settings.drain_delay,
            Err(e) => {
                warn!("Could not read delayed jobs: {}", e);
                self.settings.drain_delay
            }
        }
    }

    async fn recover_stalled(&self) {
        let report = match self.queue.recover_stalled().await {
            Ok(report) => report,
            Err(e) => {
                error!("Stalled job check failed: {}", e);
                return;
            }
        };

        for job in report.dead {
            warn!(video_id = %job.video_id, "Stalled job ran out of attempts");
            if let Err(e) = self.statuses.mark_failed(job.video_id).await {
                error!(video_id = %job.video_id, "Failed to mark video FAILED: {}", e);
            }
        }
    }

    async fn handle(&self, delivery: Delivery) {
        let span = info_span!(
            "transcode",
            video_id = %delivery.job.video_id,
            job_id = %delivery.id,
            attempt = delivery.attempt,
        );

        async {
            info!("📦 Received transcoding job");
            let renewal = LockRenewal::start(
                Arc::clone(&self.queue),
                delivery.clone(),
                self.settings.lock_duration,
                self.settings.lock_renew_interval,
            );
            let outcome = self.transcode(&delivery.job).await;
            drop(renewal);

            match outcome {
                Ok(playlist_url) => {
                    info!(%playlist_url, "✅ Video ready");
                    if let Err(e) = self.queue.complete(&delivery).await {
                        warn!("Could not acknowledge job: {}", e);
                    }
                }
                Err(err) => self.handle_failure(&delivery, err).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn handle_failure(&self, delivery: &Delivery, err: PipelineError) {
        let retryable = err.is_retryable();
        let gives_up = !retryable || delivery.is_final_attempt();
        error!(retryable, gives_up, "❌ Transcode failed: {}", err);

        // Earlier attempts leave the row PROCESSING while the job backs off.
        if gives_up {
            if let Err(e) = self.statuses.mark_failed(delivery.job.video_id).await {
                error!("Failed to mark video FAILED: {}", e);
            }
        }

        match self.queue.fail(delivery, &err.to_string(), retryable).await {
            Ok(FailOutcome::Retrying { delay }) => info!(?delay, "Job scheduled for retry"),
            Ok(FailOutcome::Dead) => warn!("Job moved to dead letters"),
            Err(e) => warn!("Could not release failed job: {}", e),
        }
    }

    async fn transcode(&self, job: &TranscodeJob) -> Result<String, PipelineError> {
        self.statuses.mark_processing(job.video_id).await?;

        let dir = WorkDir::create(&self.settings.temp_root, job.video_id)
            .await
            .map_err(PipelineError::WorkDir)?;

        let result = self.transcode_in(&dir, job).await;

        if let Err(e) = dir.remove().await {
            warn!("Failed to remove working directory: {}", e);
        }
        result
    }

    async fn transcode_in(&self, dir: &WorkDir, job: &TranscodeJob) -> Result<String, PipelineError> {
        info!("⬇️ Downloading source {}", job.storage_key);
        let input = dir.source_path();
        let bytes = self
            .storage
            .download(&job.storage_key, &input)
            .await
            .map_err(PipelineError::Download)?;
        info!(bytes, "⬇️ Downloaded source");

        let artifacts = self.executor.run(&input).await?;
        info!(files = artifacts.len(), "🎥 Transcode finished");

        let prefix = format!("hls/{}", job.video_id);
        let keys = self
            .storage
            .upload_dir(dir.path(), &prefix)
            .await
            .map_err(PipelineError::Upload)?;
        info!(objects = keys.len(), "⬆️ Uploaded HLS artifacts to {}", prefix);

        let playlist_url = self
            .storage_settings
            .public_url(&format!("{prefix}/{MASTER_PLAYLIST}"))?
            .to_string();
        self.statuses.mark_ready(job.video_id, &playlist_url).await?;

        Ok(playlist_url)
    }
}
