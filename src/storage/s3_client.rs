// S3 client for job results

use async_trait::async_trait;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use tracing::{debug, info};

use super::{ObjectStore, StorageError, StorageResult};
use crate::config::StorageConfig;

pub struct S3Client {
    bucket: Bucket,
}

impl S3Client {
    pub fn new(config: &StorageConfig) -> StorageResult<Self> {
        let region = match &config.s3_endpoint {
            Some(endpoint) => Region::Custom {
                region: config.s3_region.clone(),
                endpoint: endpoint.trim_end_matches('/').to_string(),
            },
            None => Region::Custom {
                region: config.s3_region.clone(),
                endpoint: format!("https://s3.{}.amazonaws.com", config.s3_region),
            },
        };

        // Without explicit keys the default chain applies (env, profile, instance metadata).
        let credentials = Credentials::new(
            config.s3_access_key_id.as_deref(),
            config.s3_secret_access_key.as_deref(),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Backend(format!("failed to resolve credentials: {}", e)))?;

        let bucket = Bucket::new(&config.s3_bucket, region, credentials)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        // Custom endpoints (MinIO, localstack) generally need path-style addressing.
        let bucket = if config.s3_endpoint.is_some() {
            bucket.with_path_style()
        } else {
            bucket
        };

        info!(bucket = %config.s3_bucket, region = %config.s3_region, "S3 client configured");
        Ok(Self { bucket })
    }
}

fn map_error(key: &str, err: S3Error) -> StorageError {
    match err {
        S3Error::HttpFailWithBody(404, _) => StorageError::NotFound(key.to_string()),
        other => StorageError::Backend(other.to_string()),
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> StorageResult<()> {
        let response = self
            .bucket
            .put_object_with_content_type(key, &body, content_type)
            .await
            .map_err(|e| map_error(key, e))?;

        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(StorageError::Backend(format!(
                "put {} returned status {}",
                key, status
            )));
        }
        debug!(key = %key, bytes = body.len(), "Stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let response = self
            .bucket
            .get_object(key)
            .await
            .map_err(|e| map_error(key, e))?;

        match response.status_code() {
            200..=299 => Ok(response.bytes().to_vec()),
            404 => Err(StorageError::NotFound(key.to_string())),
            status => Err(StorageError::Backend(format!(
                "get {} returned status {}",
                key, status
            ))),
        }
    }

    fn backend(&self) -> &'static str {
        "s3"
    }
}
