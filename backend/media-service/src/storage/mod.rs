use async_trait::async_trait;
use aws_sdk_s3::Client;
use tracing::info;

use crate::config::StorageConfig;
use crate::error::{MediaError, Result};

/// Object storage backend holding the media bytes.
///
/// Deletes must be idempotent: removing an object that is already gone is
/// success, so redelivered cleanup events converge.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn delete_object(&self, public_id: &str) -> Result<()>;
}

/// S3-backed object storage.
pub struct S3ObjectStorage {
    client: Client,
    bucket: String,
}

impl S3ObjectStorage {
    pub fn new(client: Client, config: &StorageConfig) -> Self {
        Self {
            client,
            bucket: config.bucket.clone(),
        }
    }

    /// Build a client from the ambient AWS environment.
    pub async fn from_env(config: &StorageConfig) -> Self {
        let aws_config =
            aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&aws_config), config)
    }
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    async fn delete_object(&self, public_id: &str) -> Result<()> {
        // S3 DeleteObject succeeds for keys that no longer exist, which is
        // exactly the idempotency the cleanup path relies on.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(public_id)
            .send()
            .await
            .map_err(|e| {
                let message = e.to_string();
                if message.contains("403") || message.contains("Forbidden") {
                    MediaError::Storage("S3 auth failed (403): check AWS credentials".to_string())
                } else {
                    MediaError::Storage(format!("S3 delete failed: {}", message))
                }
            })?;

        info!(public_id, "object deleted from storage");
        Ok(())
    }
}
