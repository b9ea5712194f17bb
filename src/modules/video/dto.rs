use super::model::VideoStatus;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct InitUploadRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Title is required"))]
    pub title: String,
    #[serde(default)]
    #[validate(
        length(min = 1, message = "Filename is required"),
        custom(function = "validate_filename")
    )]
    pub filename: String,
}

/// The filename becomes the last segment of the storage key, so it must stay one segment.
fn validate_filename(filename: &str) -> Result<(), ValidationError> {
    if filename.contains(['/', '\\']) || filename.contains("..") {
        return Err(ValidationError::new("filename")
            .with_message(Cow::from("Filename must not contain path separators or '..'")));
    }
    Ok(())
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    pub video_id: Uuid,
    pub upload_url: String,
    pub s3_key: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessUploadRequest {
    #[serde(default)]
    #[validate(required(message = "videoId is required"))]
    pub video_id: Option<Uuid>,
    #[serde(default)]
    #[validate(length(min = 1, message = "s3Key is required"))]
    pub s3_key: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProcessUploadResponse {
    pub success: bool,
    pub status: VideoStatus,
}
