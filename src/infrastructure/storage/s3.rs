use crate::common::artifacts::{ArtifactSet, content_type_for};
use crate::config::settings::StorageSettings;
use async_trait::async_trait;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::presigning::{PresigningConfig, PresigningConfigError};
use aws_sdk_s3::primitives::{ByteStream, ByteStreamError};
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::{Client, config::BehaviorVersion, config::Credentials, config::Region};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 error: {0}")]
    S3(#[from] aws_sdk_s3::Error),

    #[error("failed to read artifact: {0}")]
    Body(#[from] ByteStreamError),

    #[error("invalid presigning config: {0}")]
    Presigning(#[from] PresigningConfigError),

    #[error("local file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Object storage as the pipeline sees it.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Streams object `key` into `dest`, returning the byte count.
    async fn download(&self, key: &str, dest: &Path) -> Result<u64, StorageError>;

    /// Uploads every artifact in `local_dir` (source excluded) under `prefix`,
    /// publicly readable. Returns the object keys written.
    async fn upload_dir(&self, local_dir: &Path, prefix: &str) -> Result<Vec<String>, StorageError>;

    async fn presigned_upload_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;
}

#[derive(Clone)]
pub struct StorageService {
    pub client: Client,
    pub bucket: String,
}

impl StorageService {
    pub async fn new(settings: &StorageSettings) -> Self {
        let credentials = Credentials::new(
            settings.access_key.as_str(),
            settings.secret_key.as_str(),
            None,
            None,
            "static",
        );

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .endpoint_url(settings.endpoint.as_str())
            .credentials_provider(credentials)
            .force_path_style(settings.force_path_style)
            .build();

        let client = Client::from_conf(config);

        info!("✅ S3 client ready for bucket {}", settings.bucket);

        Self {
            client,
            bucket: settings.bucket.clone(),
        }
    }
}

#[async_trait]
impl ArtifactStore for StorageService {
    async fn download(&self, key: &str, dest: &Path) -> Result<u64, StorageError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(aws_sdk_s3::Error::from)?;

        let mut reader = object.body.into_async_read();
        let mut file = tokio::fs::File::create(dest).await?;
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;

        Ok(written)
    }

    async fn upload_dir(&self, local_dir: &Path, prefix: &str) -> Result<Vec<String>, StorageError> {
        let artifacts = ArtifactSet::scan(local_dir).await?;
        let prefix = prefix.trim_end_matches('/');
        let mut keys = Vec::with_capacity(artifacts.len());

        for path in &artifacts.files {
            let Some(name) = ArtifactSet::relative_name(path) else {
                continue;
            };
            let key = format!("{prefix}/{name}");
            let content_type = content_type_for(path);
            debug!(%key, %content_type, "Uploading artifact");

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .body(ByteStream::from_path(path).await?)
                .content_type(content_type)
                .acl(ObjectCannedAcl::PublicRead)
                .send()
                .await
                .map_err(aws_sdk_s3::Error::from)?;

            keys.push(key);
        }

        Ok(keys)
    }

    async fn presigned_upload_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(PresigningConfig::expires_in(ttl)?)
            .await
            .map_err(aws_sdk_s3::Error::from)?;

        Ok(presigned.uri().to_string())
    }
}
