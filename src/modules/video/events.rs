use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue message asking a worker to transcode one uploaded video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeJob {
    pub video_id: Uuid,
    pub storage_key: String,
}

impl TranscodeJob {
    pub fn new(video_id: Uuid, storage_key: impl Into<String>) -> Self {
        Self {
            video_id,
            storage_key: storage_key.into(),
        }
    }
}
