//! Blob storage capability.
//!
//! Document bytes live behind this trait; rows only carry an opaque
//! `blob_ref`. Keys are content-addressed by the SHA-256 hash of the bytes,
//! so re-uploading identical content is idempotent at the storage layer.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;

use crate::config::BlobStoreConfig;

#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: Option<String>) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn delete(&self, key: &str) -> Result<()>;
}

pub fn blob_key(workspace_id: uuid::Uuid, content_hash: &str) -> String {
    format!("{}/{}", workspace_id, content_hash)
}

pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub async fn from_config(config: &BlobStoreConfig) -> Result<Self> {
        let mut loader = aws_config::from_env().region(aws_config::Region::new(
            config.region.clone(),
        ));

        if let Some(endpoint) = &config.url {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.url.is_some())
            .build();

        Ok(Self::new(
            S3Client::from_conf(s3_config),
            config.bucket.clone(),
        ))
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: Option<String>) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes));

        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }

        request
            .send()
            .await
            .context("failed to upload object to blob store")?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("failed to download object from blob store")?;

        let bytes = response
            .body
            .collect()
            .await
            .context("failed to read object stream")?
            .into_bytes()
            .to_vec();

        Ok(bytes)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("failed to delete object from blob store")?;
        Ok(())
    }
}

/// In-process store used when no blob store is configured (development and
/// tests).
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: Option<String>) -> Result<()> {
        self.objects
            .lock()
            .map_err(|_| anyhow::anyhow!("blob store lock poisoned"))?
            .insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .map_err(|_| anyhow::anyhow!("blob store lock poisoned"))?
            .get(key)
            .cloned()
            .with_context(|| format!("blob {} not found", key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects
            .lock()
            .map_err(|_| anyhow::anyhow!("blob store lock poisoned"))?
            .remove(key);
        Ok(())
    }
}
