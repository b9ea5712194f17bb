use crate::common::response::ErrorBody;
use crate::modules::video::dto::{
    InitUploadRequest, InitUploadResponse, ProcessUploadRequest, ProcessUploadResponse,
};
use crate::modules::video::model::{VideoStatus, VideoStatusView};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::video::handler::init_upload,
        crate::modules::video::handler::process_upload,
        crate::modules::video::handler::get_status,
    ),
    components(
        schemas(
            InitUploadRequest, InitUploadResponse,
            ProcessUploadRequest, ProcessUploadResponse,
            VideoStatus, VideoStatusView, ErrorBody,
        )
    ),
    tags(
        (name = "Upload", description = "Source upload and transcode requests"),
        (name = "Videos", description = "Processing status")
    )
)]
pub struct ApiDoc;
