use super::model::{Video, VideoStatus, VideoStatusView};
use crate::infrastructure::db::pool::DbPool;
use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row for video {id}: {reason}")]
    Corrupt { id: Uuid, reason: String },
}

/// Writes owned by the request layer: creating a video and queueing it.
#[async_trait]
pub trait VideoIntakeStore: Send + Sync {
    /// Inserts a new `PENDING` row.
    async fn insert(&self, title: &str) -> Result<Video, RepositoryError>;

    /// Sets `QUEUED` and the source key. Returns `false` when no row matched.
    async fn mark_queued(&self, id: Uuid, original_file_path: &str) -> Result<bool, RepositoryError>;

    /// Puts a queued video back to `PENDING` after its message could not be published.
    async fn reset_pending(&self, id: Uuid) -> Result<(), RepositoryError>;

    async fn find_status(&self, id: Uuid) -> Result<Option<VideoStatusView>, RepositoryError>;
}

/// Writes owned by the transcode worker.
#[async_trait]
pub trait TranscodeStatusStore: Send + Sync {
    async fn mark_processing(&self, id: Uuid) -> Result<(), RepositoryError>;

    async fn mark_ready(&self, id: Uuid, hls_playlist_path: &str) -> Result<(), RepositoryError>;

    async fn mark_failed(&self, id: Uuid) -> Result<(), RepositoryError>;
}

#[derive(Clone)]
pub struct VideoRepository {
    pool: DbPool,
}

impl VideoRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    // Single-row by-id update. The queue lock, not the database, serialises writers.
    async fn set_status(
        &self,
        id: Uuid,
        status: VideoStatus,
        hls_playlist_path: Option<&str>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE videos SET status = $1, hls_playlist_path = $2 WHERE id = $3")
            .bind(status.as_str())
            .bind(hls_playlist_path)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl VideoIntakeStore for VideoRepository {
    async fn insert(&self, title: &str) -> Result<Video, RepositoryError> {
        let video = sqlx::query_as::<_, Video>(
            r#"
            INSERT INTO videos (id, title, status)
            VALUES ($1, $2, $3)
            RETURNING id, title, status, original_file_path, hls_playlist_path, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(title)
        .bind(VideoStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(video)
    }

    async fn mark_queued(&self, id: Uuid, original_file_path: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE videos SET status = $1, original_file_path = $2, hls_playlist_path = NULL WHERE id = $3",
        )
        .bind(VideoStatus::Queued.as_str())
        .bind(original_file_path)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reset_pending(&self, id: Uuid) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE videos SET status = $1 WHERE id = $2 AND status = $3")
            .bind(VideoStatus::Pending.as_str())
            .bind(id)
            .bind(VideoStatus::Queued.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_status(&self, id: Uuid) -> Result<Option<VideoStatusView>, RepositoryError> {
        let row: Option<(String, Option<String>)> =
            sqlx::query_as("SELECT status, hls_playlist_path FROM videos WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(status, hls_playlist_path)| {
            let status = status
                .parse::<VideoStatus>()
                .map_err(|reason| RepositoryError::Corrupt { id, reason })?;
            Ok(VideoStatusView {
                status,
                hls_playlist_path,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl TranscodeStatusStore for VideoRepository {
    async fn mark_processing(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.set_status(id, VideoStatus::Processing, None).await
    }

    async fn mark_ready(&self, id: Uuid, hls_playlist_path: &str) -> Result<(), RepositoryError> {
        self.set_status(id, VideoStatus::Ready, Some(hls_playlist_path)).await
    }

    async fn mark_failed(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.set_status(id, VideoStatus::Failed, None).await
    }
}
