use crate::config::env::{self, ConfigError, EnvKey};
use crate::infrastructure::queue::{Backoff, JobOptions};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_port: u16,
    pub database: DatabaseSettings,
    pub redis_url: Option<String>,
    pub storage: StorageSettings,
    pub queue: QueueSettings,
    pub worker: WorkerSettings,
}

#[derive(Clone, Debug)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl DatabaseSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(invalid(EnvKey::DatabaseMaxConnections, "must be at least 1"));
        }
        if self.min_connections > self.max_connections {
            return Err(invalid(
                EnvKey::DatabaseMinConnections,
                "must not exceed DATABASE_MAX_CONNECTIONS",
            ));
        }
        if self.acquire_timeout.is_zero() {
            return Err(invalid(EnvKey::DatabaseAcquireTimeoutSecs, "must be positive"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct StorageSettings {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    /// Host the bucket is publicly served from, e.g. `fly.storage.tigris.dev`.
    pub public_host: String,
    pub force_path_style: bool,
    pub upload_url_ttl: Duration,
}

impl StorageSettings {
    /// Public URL of `key`: `https://{bucket}.{public_host}/{key}`.
    pub fn public_url(&self, key: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!("https://{}.{}/", self.bucket, self.public_host))?.join(key)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueBackend {
    Redis,
    Memory,
}

impl FromStr for QueueBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(QueueBackend::Redis),
            "memory" => Ok(QueueBackend::Memory),
            other => Err(format!("unknown queue backend: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct QueueSettings {
    pub backend: QueueBackend,
    pub name: String,
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl QueueSettings {
    pub fn job_options(&self) -> JobOptions {
        JobOptions {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
        }
    }
}

fn parse_backoff(kind: &str, delay_ms: u64) -> Result<Backoff, ConfigError> {
    match kind.trim().to_ascii_lowercase().as_str() {
        "fixed" => Ok(Backoff::Fixed { delay_ms }),
        "exponential" => Ok(Backoff::Exponential { base_delay_ms: delay_ms }),
        other => Err(invalid(
            EnvKey::JobBackoffKind,
            &format!("{other:?} is not one of fixed, exponential"),
        )),
    }
}

fn invalid(key: EnvKey, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.as_str(),
        reason: reason.to_string(),
    }
}

#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub enabled: bool,
    pub concurrency: usize,
    pub lock_duration: Duration,
    pub lock_renew_interval: Duration,
    pub drain_delay: Duration,
    pub temp_root: PathBuf,
    pub shell: String,
    pub script: PathBuf,
}

impl WorkerSettings {
    /// Lock timings must leave room to renew before the lock lapses.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(invalid(EnvKey::WorkerConcurrency, "must be at least 1"));
        }
        if self.lock_duration.is_zero() {
            return Err(invalid(EnvKey::WorkerLockDurationMs, "must be positive"));
        }
        if self.lock_renew_interval.is_zero() || self.lock_renew_interval >= self.lock_duration {
            return Err(invalid(
                EnvKey::WorkerLockRenewMs,
                "must be positive and shorter than WORKER_LOCK_DURATION_MS",
            ));
        }
        if self.drain_delay.is_zero() {
            return Err(invalid(EnvKey::WorkerDrainDelayMs, "must be positive"));
        }
        Ok(())
    }
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let backend = env::get_or(EnvKey::QueueBackend, "redis")
            .parse::<QueueBackend>()
            .map_err(|reason| ConfigError::Invalid {
                key: EnvKey::QueueBackend.as_str(),
                reason,
            })?;

        let redis_url = match backend {
            QueueBackend::Redis => Some(env::get(EnvKey::RedisUrl)?),
            QueueBackend::Memory => env::get(EnvKey::RedisUrl).ok(),
        };

        let max_attempts = env::get_parsed(EnvKey::JobMaxAttempts, 3u32)?;
        if max_attempts == 0 {
            return Err(invalid(EnvKey::JobMaxAttempts, "must be at least 1"));
        }

        let config = Self {
            server_port: env::get_parsed(EnvKey::ServerPort, 8080)?,
            database: DatabaseSettings {
                url: env::get(EnvKey::DatabaseUrl)?,
                max_connections: env::get_parsed(EnvKey::DatabaseMaxConnections, 20)?,
                min_connections: env::get_parsed(EnvKey::DatabaseMinConnections, 2)?,
                acquire_timeout: Duration::from_secs(env::get_parsed(EnvKey::DatabaseAcquireTimeoutSecs, 5)?),
            },
            redis_url,
            storage: StorageSettings {
                endpoint: env::get(EnvKey::StorageEndpoint)?,
                region: env::get_or(EnvKey::StorageRegion, "auto"),
                bucket: env::get(EnvKey::StorageBucket)?,
                access_key: env::get(EnvKey::StorageAccessKey)?,
                secret_key: env::get(EnvKey::StorageSecretKey)?,
                public_host: env::get_or(EnvKey::StoragePublicHost, "fly.storage.tigris.dev"),
                force_path_style: env::get_parsed(EnvKey::StorageForcePathStyle, false)?,
                upload_url_ttl: Duration::from_secs(env::get_parsed(EnvKey::UploadUrlTtlSecs, 3600)?),
            },
            queue: QueueSettings {
                backend,
                name: env::get_or(EnvKey::QueueName, "video-transcoding-queue"),
                max_attempts,
                backoff: parse_backoff(
                    &env::get_or(EnvKey::JobBackoffKind, "exponential"),
                    env::get_parsed(EnvKey::JobBackoffMs, 1000)?,
                )?,
            },
            worker: WorkerSettings {
                enabled: env::get_parsed(EnvKey::WorkerEnabled, true)?,
                concurrency: env::get_parsed(EnvKey::WorkerConcurrency, 1usize)?,
                lock_duration: Duration::from_millis(env::get_parsed(EnvKey::WorkerLockDurationMs, 60_000)?),
                lock_renew_interval: Duration::from_millis(env::get_parsed(EnvKey::WorkerLockRenewMs, 15_000)?),
                drain_delay: Duration::from_millis(env::get_parsed(EnvKey::WorkerDrainDelayMs, 5_000)?),
                temp_root: PathBuf::from(env::get_or(EnvKey::WorkerTempDir, "./temp")),
                shell: env::get_or(EnvKey::TranscodeShell, "bash"),
                script: PathBuf::from(env::get_or(EnvKey::TranscodeScript, "scripts/encode_master.sh")),
            },
        };

        config.database.validate()?;
        config.worker.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
impl AppConfig {
    pub fn for_tests() -> Self {
        Self {
            server_port: 0,
            database: DatabaseSettings {
                url: "postgres://localhost/test".to_string(),
                max_connections: 5,
                min_connections: 0,
                acquire_timeout: Duration::from_secs(5),
            },
            redis_url: None,
            storage: StorageSettings {
                endpoint: "http://localhost:9000".to_string(),
                region: "auto".to_string(),
                bucket: "videos".to_string(),
                access_key: "test".to_string(),
                secret_key: "test".to_string(),
                public_host: "fly.storage.tigris.dev".to_string(),
                force_path_style: true,
                upload_url_ttl: Duration::from_secs(3600),
            },
            queue: QueueSettings {
                backend: QueueBackend::Memory,
                name: "video-transcoding-queue".to_string(),
                max_attempts: 3,
                backoff: Backoff::Exponential { base_delay_ms: 1000 },
            },
            worker: WorkerSettings {
                enabled: false,
                concurrency: 1,
                lock_duration: Duration::from_secs(60),
                lock_renew_interval: Duration::from_secs(15),
                drain_delay: Duration::from_millis(20),
                temp_root: PathBuf::from("./temp"),
                shell: "sh".to_string(),
                script: PathBuf::from("scripts/encode_master.sh"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_uses_virtual_host_bucket() {
        let storage = AppConfig::for_tests().storage;
        let url = storage.public_url("hls/abc/master.m3u8").unwrap();
        assert_eq!(url.as_str(), "https://videos.fly.storage.tigris.dev/hls/abc/master.m3u8");
    }

    #[test]
    fn backoff_kind_is_parsed_strictly() {
        assert_eq!(parse_backoff("fixed", 500).unwrap(), Backoff::Fixed { delay_ms: 500 });
        assert_eq!(
            parse_backoff(" Exponential ", 1000).unwrap(),
            Backoff::Exponential { base_delay_ms: 1000 }
        );
        assert!(matches!(
            parse_backoff("bogus", 1000),
            Err(ConfigError::Invalid { key: "JOB_BACKOFF_KIND", .. })
        ));
        assert_eq!(AppConfig::for_tests().queue.job_options(), JobOptions::default());
    }

    #[test]
    fn worker_timings_must_allow_renewal() {
        let base = AppConfig::for_tests().worker;
        assert!(base.validate().is_ok());

        let zero_renew = WorkerSettings {
            lock_renew_interval: Duration::ZERO,
            ..base.clone()
        };
        assert!(matches!(
            zero_renew.validate(),
            Err(ConfigError::Invalid { key: "WORKER_LOCK_RENEW_MS", .. })
        ));

        let renew_after_expiry = WorkerSettings {
            lock_renew_interval: base.lock_duration,
            ..base.clone()
        };
        assert!(renew_after_expiry.validate().is_err());

        let zero_drain = WorkerSettings {
            drain_delay: Duration::ZERO,
            ..base.clone()
        };
        assert!(matches!(
            zero_drain.validate(),
            Err(ConfigError::Invalid { key: "WORKER_DRAIN_DELAY_MS", .. })
        ));

        let no_slots = WorkerSettings {
            concurrency: 0,
            ..base
        };
        assert!(no_slots.validate().is_err());
    }

    #[test]
    fn database_pool_needs_a_connection() {
        let base = AppConfig::for_tests().database;
        assert!(base.validate().is_ok());

        let empty = DatabaseSettings {
            max_connections: 0,
            ..base.clone()
        };
        assert!(matches!(
            empty.validate(),
            Err(ConfigError::Invalid { key: "DATABASE_MAX_CONNECTIONS", .. })
        ));

        let inverted = DatabaseSettings {
            min_connections: 10,
            ..base
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn queue_backend_parses_case_insensitively() {
        assert_eq!("Memory".parse::<QueueBackend>().unwrap(), QueueBackend::Memory);
        assert_eq!(" redis ".parse::<QueueBackend>().unwrap(), QueueBackend::Redis);
        assert!("kafka".parse::<QueueBackend>().is_err());
    }
}
