//! S3/MinIO blob store adapter.
//!
//! Uploads are content-addressed: the storage handle embeds the SHA-256 of
//! the file bytes, so re-uploading identical content is idempotent.

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    primitives::ByteStream,
    Client as S3Client,
};
use bytes::Bytes;
use cw_ports::{BlobMeta, BlobStore, StorageError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

/// Object storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    /// Endpoint URL (e.g., "http://localhost:9000")
    pub endpoint: String,
    /// Region (any value works for MinIO)
    pub region: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket for applicant documents
    pub bucket: String,
    /// Path-style addressing (required for MinIO)
    pub force_path_style: bool,
}

impl ObjectStoreConfig {
    pub fn local_dev() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            region: "us-east-1".to_string(),
            access_key_id: "minioadmin".to_string(),
            secret_access_key: "minioadmin".to_string(),
            bucket: "applicant-documents".to_string(),
            force_path_style: true,
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::local_dev();
        Self {
            endpoint: std::env::var("OBJECT_STORE_ENDPOINT").unwrap_or(defaults.endpoint),
            region: std::env::var("OBJECT_STORE_REGION").unwrap_or(defaults.region),
            access_key_id: std::env::var("OBJECT_STORE_ACCESS_KEY")
                .unwrap_or(defaults.access_key_id),
            secret_access_key: std::env::var("OBJECT_STORE_SECRET_KEY")
                .unwrap_or(defaults.secret_access_key),
            bucket: std::env::var("OBJECT_STORE_BUCKET").unwrap_or(defaults.bucket),
            force_path_style: true,
        }
    }
}

/// S3-compatible [`BlobStore`].
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
}

impl S3BlobStore {
    /// Build the client and ensure the bucket exists.
    pub async fn connect(config: ObjectStoreConfig) -> Result<Self, StorageError> {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "casework-blob-store",
        );
        let s3_config = S3ConfigBuilder::new()
            .endpoint_url(&config.endpoint)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(config.force_path_style)
            .behavior_version(BehaviorVersion::latest())
            .build();

        let store = Self {
            client: S3Client::from_conf(s3_config),
            bucket: config.bucket,
        };
        store.ensure_bucket().await?;
        info!(bucket = %store.bucket, "blob store initialized");
        Ok(store)
    }

    async fn ensure_bucket(&self) -> Result<(), StorageError> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                debug!(bucket = %self.bucket, "bucket exists");
                Ok(())
            }
            Err(e) => {
                warn!(bucket = %self.bucket, error = ?e, "bucket not found, creating");
                self.client
                    .create_bucket()
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .map_err(|e| StorageError::Storage {
                        message: format!("failed to create bucket: {e}"),
                    })?;
                info!(bucket = %self.bucket, "created bucket");
                Ok(())
            }
        }
    }
}

impl BlobStore for S3BlobStore {
    #[instrument(skip(self, content), fields(filename = %meta.filename, bytes = content.len()))]
    async fn put(&self, content: Bytes, meta: &BlobMeta) -> Result<String, StorageError> {
        let digest = hex::encode(Sha256::digest(&content));
        let handle = format!("sha256/{digest}/{}", meta.filename);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&handle)
            .content_type(&meta.content_type)
            .body(ByteStream::from(content))
            .send()
            .await
            .map_err(|e| StorageError::Storage {
                message: format!("failed to store blob: {e}"),
            })?;

        debug!(handle = %handle, "blob stored");
        Ok(handle)
    }

    #[instrument(skip(self))]
    async fn open(&self, handle: &str) -> Result<Bytes, StorageError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(handle)
            .send()
            .await
            .map_err(|e| match &e {
                aws_sdk_s3::error::SdkError::ServiceError(service)
                    if service.err().is_no_such_key() =>
                {
                    StorageError::NotFound {
                        handle: handle.to_string(),
                    }
                }
                _ => StorageError::Storage {
                    message: format!("failed to fetch blob: {e}"),
                },
            })?;

        let data = object
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Storage {
                message: format!("failed to read blob body: {e}"),
            })?;
        Ok(data.into_bytes())
    }
}
