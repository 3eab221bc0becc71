use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub queue: QueueConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// `redis://`, `rediss://` or `memory://`
    pub url: String,
    pub name: String,
    pub visibility_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub provider: String,
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_access_key_id: Option<String>,
    pub s3_secret_access_key: Option<String>,
    pub s3_endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub wait_secs: u64,
    pub error_backoff_secs: u64,
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

impl WorkerConfig {
    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let required = |key: &str| match lookup(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => bail!("{} environment variable is required", key),
        };

        Ok(Self {
            server: ServerConfig {
                port: var("PORT", "8080")
                    .parse()
                    .context("PORT must be a valid port number")?,
                host: var("HOST", "0.0.0.0"),
            },
            queue: QueueConfig {
                url: required("QUEUE_URL")?,
                name: var("QUEUE_NAME", "jobs"),
                visibility_timeout_secs: var("QUEUE_VISIBILITY_TIMEOUT_SECS", "30")
                    .parse()
                    .context("QUEUE_VISIBILITY_TIMEOUT_SECS must be a number of seconds")?,
            },
            storage: StorageConfig {
                provider: var("STORAGE_PROVIDER", "s3"),
                s3_bucket: required("S3_BUCKET")?,
                s3_region: lookup("AWS_REGION")
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "us-east-1".to_string()),
                s3_access_key_id: lookup("AWS_ACCESS_KEY_ID"),
                s3_secret_access_key: lookup("AWS_SECRET_ACCESS_KEY"),
                s3_endpoint: lookup("S3_ENDPOINT").filter(|e| !e.is_empty()),
            },
            worker: WorkerConfig {
                // Anything other than the exact string "true" leaves the worker off.
                enabled: lookup("WORKER_ENABLED").as_deref() == Some("true"),
                wait_secs: var("WORKER_WAIT_SECS", "20")
                    .parse()
                    .context("WORKER_WAIT_SECS must be a number of seconds")?,
                error_backoff_secs: var("WORKER_ERROR_BACKOFF_SECS", "5")
                    .parse()
                    .context("WORKER_ERROR_BACKOFF_SECS must be a number of seconds")?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[
            ("QUEUE_URL", "redis://localhost:6379"),
            ("S3_BUCKET", "results"),
        ]))
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.queue.name, "jobs");
        assert_eq!(config.queue.visibility_timeout(), Duration::from_secs(30));
        assert_eq!(config.storage.provider, "s3");
        assert_eq!(config.storage.s3_region, "us-east-1");
        assert!(config.storage.s3_endpoint.is_none());
        assert!(!config.worker.enabled);
        assert_eq!(config.worker.wait_time(), Duration::from_secs(20));
        assert_eq!(config.worker.error_backoff(), Duration::from_secs(5));
    }

    #[test]
    fn test_missing_queue_url_is_fatal() {
        let err = Config::from_lookup(lookup_from(&[("S3_BUCKET", "results")])).unwrap_err();
        assert!(err.to_string().contains("QUEUE_URL"));
    }

    #[test]
    fn test_missing_bucket_is_fatal() {
        let err = Config::from_lookup(lookup_from(&[
            ("QUEUE_URL", "memory://"),
            ("S3_BUCKET", ""),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("S3_BUCKET"));
    }

    #[test]
    fn test_worker_flag_requires_exact_true() {
        for (value, expected) in [("true", true), ("TRUE", false), ("1", false), ("yes", false)] {
            let config = Config::from_lookup(lookup_from(&[
                ("QUEUE_URL", "memory://"),
                ("S3_BUCKET", "results"),
                ("WORKER_ENABLED", value),
            ]))
            .unwrap();
            assert_eq!(config.worker.enabled, expected, "WORKER_ENABLED={}", value);
        }
    }

    #[test]
    fn test_invalid_port() {
        let result = Config::from_lookup(lookup_from(&[
            ("QUEUE_URL", "memory://"),
            ("S3_BUCKET", "results"),
            ("PORT", "not-a-port"),
        ]));
        assert!(result.is_err());
    }
}
