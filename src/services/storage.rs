use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};

/// Object storage seam: store, delete, and address generated artifacts.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(&self, key: &str, data: &[u8], content_type: &str)
        -> Result<(), StorageError>;

    /// Delete an object. A key that is already gone is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Public URL an object is served from.
    fn url_of(&self, key: &str) -> String;
}

/// Resolve an image reference to a dereferenceable URL: absolute URLs pass
/// through, bare keys resolve against the storage's public base.
pub fn resolve_image_url(
    storage: &dyn ObjectStorage,
    reference: &str,
) -> Result<String, StorageError> {
    if reference.is_empty() {
        return Err(StorageError::Unresolvable(
            "empty image reference".to_string(),
        ));
    }
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return Ok(reference.to_string());
    }
    Ok(storage.url_of(reference))
}

/// Client for Cloudflare R2 object storage (S3-compatible).
pub struct R2Client {
    bucket: Box<Bucket>,
    public_base: String,
}

impl R2Client {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        public_base: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            bucket,
            public_base: public_base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ObjectStorage for R2Client {
    async fn upload(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(StorageError::S3)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match self.bucket.delete_object(key).await {
            Ok(_) => Ok(()),
            // Already deleted: the sweep may run after a manual purge.
            Err(s3::error::S3Error::HttpFailWithBody(404, _)) => Ok(()),
            Err(e) => Err(StorageError::S3(e)),
        }
    }

    fn url_of(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("unresolvable image reference: {0}")]
    Unresolvable(String),
}
