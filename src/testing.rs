//! In-process stand-ins for Postgres, object storage and the encoder.

use crate::common::artifacts::{ArtifactSet, MASTER_PLAYLIST, content_type_for};
use crate::infrastructure::storage::s3::{ArtifactStore, StorageError};
use crate::modules::video::model::{Video, VideoStatus, VideoStatusView};
use crate::modules::video::repository::{RepositoryError, TranscodeStatusStore, VideoIntakeStore};
use crate::workers::executor::{ExecutionError, Executor};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryVideoStore {
    videos: Mutex<HashMap<Uuid, Video>>,
    history: Mutex<Vec<(Uuid, VideoStatus)>>,
}

impl InMemoryVideoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, title: &str, status: VideoStatus) -> Uuid {
        let id = Uuid::new_v4();
        self.videos.lock().unwrap().insert(
            id,
            Video {
                id,
                title: title.to_string(),
                status: status.as_str().to_string(),
                original_file_path: None,
                hls_playlist_path: None,
                created_at: OffsetDateTime::now_utc(),
            },
        );
        id
    }

    pub fn get(&self, id: Uuid) -> Option<Video> {
        self.videos.lock().unwrap().get(&id).cloned()
    }

    pub fn status_of(&self, id: Uuid) -> Option<VideoStatus> {
        self.get(id).and_then(|v| v.status.parse().ok())
    }

    /// Every status written for `id`, in order.
    pub fn history(&self, id: Uuid) -> Vec<VideoStatus> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|(vid, _)| *vid == id)
            .map(|(_, status)| *status)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.videos.lock().unwrap().len()
    }

    fn set(&self, id: Uuid, status: VideoStatus, hls: Option<&str>) {
        if let Some(video) = self.videos.lock().unwrap().get_mut(&id) {
            video.status = status.as_str().to_string();
            video.hls_playlist_path = hls.map(str::to_string);
            self.history.lock().unwrap().push((id, status));
        }
    }
}

#[async_trait]
impl VideoIntakeStore for InMemoryVideoStore {
    async fn insert(&self, title: &str) -> Result<Video, RepositoryError> {
        let id = self.seed(title, VideoStatus::Pending);
        self.history.lock().unwrap().push((id, VideoStatus::Pending));
        self.get(id).ok_or(RepositoryError::Corrupt {
            id,
            reason: "vanished after insert".to_string(),
        })
    }

    async fn mark_queued(&self, id: Uuid, original_file_path: &str) -> Result<bool, RepositoryError> {
        let mut videos = self.videos.lock().unwrap();
        let Some(video) = videos.get_mut(&id) else {
            return Ok(false);
        };
        video.status = VideoStatus::Queued.as_str().to_string();
        video.original_file_path = Some(original_file_path.to_string());
        video.hls_playlist_path = None;
        self.history.lock().unwrap().push((id, VideoStatus::Queued));
        Ok(true)
    }

    async fn reset_pending(&self, id: Uuid) -> Result<(), RepositoryError> {
        if self.status_of(id) == Some(VideoStatus::Queued) {
            self.set(id, VideoStatus::Pending, None);
        }
        Ok(())
    }

    async fn find_status(&self, id: Uuid) -> Result<Option<VideoStatusView>, RepositoryError> {
        Ok(self.get(id).and_then(|v| {
            Some(VideoStatusView {
                status: v.status.parse().ok()?,
                hls_playlist_path: v.hls_playlist_path,
            })
        }))
    }
}

#[async_trait]
impl TranscodeStatusStore for InMemoryVideoStore {
    async fn mark_processing(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.set(id, VideoStatus::Processing, None);
        Ok(())
    }

    async fn mark_ready(&self, id: Uuid, hls_playlist_path: &str) -> Result<(), RepositoryError> {
        self.set(id, VideoStatus::Ready, Some(hls_playlist_path));
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.set(id, VideoStatus::Failed, None);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeArtifactStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    uploads: Mutex<Vec<(String, String)>>,
    failing_uploads: AtomicUsize,
}

impl FakeArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_source(&self, key: &str, bytes: &[u8]) {
        self.objects.lock().unwrap().insert(key.to_string(), bytes.to_vec());
    }

    /// `(key, content type)` of every object uploaded so far.
    pub fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn fail_next_uploads(&self, n: usize) {
        self.failing_uploads.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ArtifactStore for FakeArtifactStore {
    async fn download(&self, key: &str, dest: &Path) -> Result<u64, StorageError> {
        let bytes = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no such key: {key}")))?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(bytes.len() as u64)
    }

    async fn upload_dir(&self, local_dir: &Path, prefix: &str) -> Result<Vec<String>, StorageError> {
        let should_fail = self
            .failing_uploads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "upload interrupted").into());
        }

        let artifacts = ArtifactSet::scan(local_dir).await?;
        let mut keys = Vec::new();
        for file in &artifacts.files {
            let Some(name) = ArtifactSet::relative_name(file) else {
                continue;
            };
            let key = format!("{prefix}/{name}");
            let bytes = tokio::fs::read(file).await?;
            self.objects.lock().unwrap().insert(key.clone(), bytes);
            self.uploads
                .lock()
                .unwrap()
                .push((key.clone(), content_type_for(file)));
            keys.push(key);
        }
        Ok(keys)
    }

    async fn presigned_upload_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        Ok(format!("https://signed.test/{key}?expires={}", ttl.as_secs()))
    }
}

/// Encoder double. Each run pops the next scripted exit code, falling back to
/// `default_exit` once the script is exhausted; 0 writes a playlist and a segment.
pub struct FakeExecutor {
    exits: Mutex<VecDeque<i32>>,
    default_exit: i32,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    runs: Mutex<Vec<Vec<String>>>,
}

impl FakeExecutor {
    pub fn new(exits: impl IntoIterator<Item = i32>, default_exit: i32, delay: Duration) -> Self {
        Self {
            exits: Mutex::new(exits.into_iter().collect()),
            default_exit,
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::new([], 0, Duration::ZERO)
    }

    pub fn always_failing() -> Self {
        Self::new([], 1, Duration::ZERO)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Directory listing seen at the start of each run.
    pub fn runs(&self) -> Vec<Vec<String>> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn run(&self, input: &Path) -> Result<ArtifactSet, ExecutionError> {
        let dir = input.parent().unwrap_or_else(|| Path::new("."));

        let mut listing: Vec<String> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        listing.sort();
        self.runs.lock().unwrap().push(listing);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let exit = self.exits.lock().unwrap().pop_front().unwrap_or(self.default_exit);
        if exit != 0 {
            tokio::fs::write(dir.join("stream_0_partial.ts"), b"half").await?;
            return Err(ExecutionError::Failed(exit));
        }

        tokio::fs::write(dir.join(MASTER_PLAYLIST), b"#EXTM3U\n").await?;
        tokio::fs::write(dir.join("stream_0_000.ts"), b"segment").await?;
        Ok(ArtifactSet::scan(dir).await?)
    }
}
