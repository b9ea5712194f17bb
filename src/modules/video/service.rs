use super::dto::{InitUploadRequest, InitUploadResponse, ProcessUploadRequest, ProcessUploadResponse};
use super::events::TranscodeJob;
use super::model::{VideoStatus, VideoStatusView};
use super::repository::RepositoryError;
use crate::infrastructure::queue::{EnqueueOutcome, QueueError};
use crate::infrastructure::storage::s3::StorageError;
use crate::state::AppState;
use tracing::{error, info};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    #[error("{0}")]
    Validation(String),

    #[error("Video not found")]
    NotFound,

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<ValidationErrors> for VideoError {
    fn from(errors: ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(message) => message.to_string(),
                    None => format!("{field} is invalid"),
                })
            })
            .collect();
        messages.sort();
        VideoError::Validation(messages.join(", "))
    }
}

/// Storage key the client uploads the source to.
pub fn raw_key(video_id: Uuid, filename: &str) -> String {
    format!("raw/{video_id}/{filename}")
}

pub struct VideoService;

impl VideoService {
    pub async fn init_upload(state: AppState, req: InitUploadRequest) -> Result<InitUploadResponse, VideoError> {
        req.validate()?;

        let video = state.videos.insert(&req.title).await?;
        let s3_key = raw_key(video.id, &req.filename);
        let upload_url = state
            .storage
            .presigned_upload_url(&s3_key, state.config.storage.upload_url_ttl)
            .await?;

        info!(video_id = %video.id, "Upload initialised for {}", s3_key);
        Ok(InitUploadResponse {
            video_id: video.id,
            upload_url,
            s3_key,
        })
    }

    /// Marks the video QUEUED, then publishes its transcode job. A publish
    /// failure puts the row back to PENDING so the client can try again.
    /// Promoting a video whose job is still live publishes nothing new.
    pub async fn queue_processing(
        state: AppState,
        req: ProcessUploadRequest,
    ) -> Result<ProcessUploadResponse, VideoError> {
        req.validate()?;
        let video_id = req
            .video_id
            .ok_or_else(|| VideoError::Validation("videoId is required".to_string()))?;

        if !state.videos.mark_queued(video_id, &req.s3_key).await? {
            return Err(VideoError::NotFound);
        }

        let job = TranscodeJob::new(video_id, req.s3_key);
        match state.queue.enqueue(&job, state.config.queue.job_options()).await {
            Ok(EnqueueOutcome::Added) => info!(%video_id, "Video queued for processing"),
            Ok(EnqueueOutcome::AlreadyQueued) => {
                info!(%video_id, "Transcode job already pending, nothing published")
            }
            Err(e) => {
                error!(%video_id, "Failed to publish transcode job: {}", e);
                if let Err(reset) = state.videos.reset_pending(video_id).await {
                    error!(%video_id, "Failed to reset video to PENDING: {}", reset);
                }
                return Err(e.into());
            }
        }

        Ok(ProcessUploadResponse {
            success: true,
            status: VideoStatus::Queued,
        })
    }

    pub async fn get_status(state: AppState, id: Uuid) -> Result<VideoStatusView, VideoError> {
        state.videos.find_status(id).await?.ok_or(VideoError::NotFound)
    }
}
