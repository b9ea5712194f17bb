use crate::config::settings::AppConfig;
use crate::infrastructure::queue::JobQueue;
use crate::infrastructure::storage::s3::ArtifactStore;
use crate::modules::video::repository::VideoIntakeStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub videos: Arc<dyn VideoIntakeStore>,
    pub storage: Arc<dyn ArtifactStore>,
    pub queue: Arc<dyn JobQueue>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        videos: Arc<dyn VideoIntakeStore>,
        storage: Arc<dyn ArtifactStore>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            config,
            videos,
            storage,
            queue,
        }
    }
}
