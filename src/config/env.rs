use std::env;
use std::fmt::Display;
use std::str::FromStr;

pub enum EnvKey {
    ServerPort,
    DatabaseUrl,
    DatabaseMaxConnections,
    DatabaseMinConnections,
    DatabaseAcquireTimeoutSecs,
    RedisUrl,
    StorageEndpoint,
    StorageRegion,
    StorageBucket,
    StorageAccessKey,
    StorageSecretKey,
    StoragePublicHost,
    StorageForcePathStyle,
    UploadUrlTtlSecs,
    QueueBackend,
    QueueName,
    JobMaxAttempts,
    JobBackoffKind,
    JobBackoffMs,
    WorkerEnabled,
    WorkerConcurrency,
    WorkerLockDurationMs,
    WorkerLockRenewMs,
    WorkerDrainDelayMs,
    WorkerTempDir,
    TranscodeShell,
    TranscodeScript,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::DatabaseMaxConnections => "DATABASE_MAX_CONNECTIONS",
            EnvKey::DatabaseMinConnections => "DATABASE_MIN_CONNECTIONS",
            EnvKey::DatabaseAcquireTimeoutSecs => "DATABASE_ACQUIRE_TIMEOUT_SECS",
            EnvKey::RedisUrl => "REDIS_URL",
            EnvKey::StorageEndpoint => "AWS_ENDPOINT",
            EnvKey::StorageRegion => "AWS_REGION",
            EnvKey::StorageBucket => "BUCKET_NAME",
            EnvKey::StorageAccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::StorageSecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::StoragePublicHost => "STORAGE_PUBLIC_HOST",
            EnvKey::StorageForcePathStyle => "S3_FORCE_PATH_STYLE",
            EnvKey::UploadUrlTtlSecs => "UPLOAD_URL_TTL_SECS",
            EnvKey::QueueBackend => "QUEUE_BACKEND",
            EnvKey::QueueName => "QUEUE_NAME",
            EnvKey::JobMaxAttempts => "JOB_MAX_ATTEMPTS",
            EnvKey::JobBackoffKind => "JOB_BACKOFF_KIND",
            EnvKey::JobBackoffMs => "JOB_BACKOFF_MS",
            EnvKey::WorkerEnabled => "WORKER_ENABLED",
            EnvKey::WorkerConcurrency => "WORKER_CONCURRENCY",
            EnvKey::WorkerLockDurationMs => "WORKER_LOCK_DURATION_MS",
            EnvKey::WorkerLockRenewMs => "WORKER_LOCK_RENEW_MS",
            EnvKey::WorkerDrainDelayMs => "WORKER_DRAIN_DELAY_MS",
            EnvKey::WorkerTempDir => "WORKER_TEMP_DIR",
            EnvKey::TranscodeShell => "TRANSCODE_SHELL",
            EnvKey::TranscodeScript => "TRANSCODE_SCRIPT",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

pub fn get(key: EnvKey) -> Result<String, ConfigError> {
    let name = key.as_str();
    match env::var(name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(ConfigError::Missing(name)),
    }
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

/// Parses the variable when set. A value that does not parse is an error, not the default.
pub fn get_parsed<T>(key: EnvKey, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    parse_value(key.as_str(), env::var(key.as_str()).ok(), default)
}

pub fn parse_value<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some(val) => val.parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            reason: format!("{val:?}: {e}"),
        }),
    }
}
