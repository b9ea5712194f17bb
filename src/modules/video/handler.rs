use super::dto::{InitUploadRequest, InitUploadResponse, ProcessUploadRequest, ProcessUploadResponse};
use super::model::VideoStatusView;
use super::service::{VideoError, VideoService};
use crate::common::response::{ApiError, ApiSuccess, ErrorBody};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

impl From<VideoError> for ApiError {
    fn from(err: VideoError) -> Self {
        match err {
            VideoError::Validation(message) => ApiError(message, StatusCode::BAD_REQUEST),
            VideoError::NotFound => ApiError("Video not found".to_string(), StatusCode::NOT_FOUND),
            other => {
                error!("Request failed: {}", other);
                ApiError("Internal Server Error".to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

/// Create a video and get a pre-signed URL to upload its source to
#[utoipa::path(
    post,
    path = "/upload/init",
    request_body = InitUploadRequest,
    responses(
        (status = 200, description = "Upload URL issued", body = InitUploadResponse),
        (status = 400, description = "Bad Request", body = ErrorBody),
        (status = 500, description = "Internal Server Error", body = ErrorBody)
    ),
    tag = "Upload"
)]
pub async fn init_upload(
    State(state): State<AppState>,
    payload: Result<Json<InitUploadRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return ApiError::from(rejection).into_response(),
    };

    match VideoService::init_upload(state, payload).await {
        Ok(res) => ApiSuccess(res, StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Queue an uploaded video for transcoding
#[utoipa::path(
    post,
    path = "/upload/process",
    request_body = ProcessUploadRequest,
    responses(
        (status = 200, description = "Video queued", body = ProcessUploadResponse),
        (status = 400, description = "Bad Request", body = ErrorBody),
        (status = 404, description = "Video not found", body = ErrorBody),
        (status = 500, description = "Internal Server Error", body = ErrorBody)
    ),
    tag = "Upload"
)]
pub async fn process_upload(
    State(state): State<AppState>,
    payload: Result<Json<ProcessUploadRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return ApiError::from(rejection).into_response(),
    };

    match VideoService::queue_processing(state, payload).await {
        Ok(res) => ApiSuccess(res, StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Current processing status of a video
#[utoipa::path(
    get,
    path = "/videos/status/{id}",
    params(
        ("id" = Uuid, Path, description = "Video ID")
    ),
    responses(
        (status = 200, description = "Video status", body = VideoStatusView),
        (status = 404, description = "Video not found", body = ErrorBody)
    ),
    tag = "Videos"
)]
pub async fn get_status(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match VideoService::get_status(state, id).await {
        Ok(view) => ApiSuccess(view, StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}
