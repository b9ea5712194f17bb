use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};

pub mod dto;
pub mod events;
pub mod handler;
pub mod model;
pub mod repository;
pub mod service;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload/init", post(handler::init_upload))
        .route("/upload/process", post(handler::process_upload))
        .route("/videos/status/{id}", get(handler::get_status))
}
