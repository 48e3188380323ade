use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use vsp_core::config::Config;

use crate::{chunk_object_key, metadata_object_key, ObjectStore, ObjectStoreError};

/// S3/MinIO-backed object store.
///
/// Writes are plain `PutObject` overwrites under deterministic keys; retries
/// are left to the caller's resumability logic.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    cancel: CancellationToken,
    op_timeout: Duration,
}

impl S3ObjectStore {
    pub async fn connect(cfg: &Config, cancel: CancellationToken) -> Result<Self, ObjectStoreError> {
        let scheme = if cfg.minio_use_ssl { "https" } else { "http" };
        let endpoint = format!("{scheme}://{}", cfg.minio_endpoint);
        let credentials = Credentials::new(
            cfg.minio_access_key.clone(),
            cfg.minio_secret_key.clone(),
            None,
            None,
            "static",
        );

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        let client = aws_sdk_s3::Client::from_conf(s3_config);

        // Best-effort bucket creation (ignore "already exists/owned" errors).
        if let Err(err) = client.create_bucket().bucket(&cfg.minio_bucket).send().await {
            warn!(
                bucket = cfg.minio_bucket.as_str(),
                error = ?err,
                "create_bucket failed (continuing)"
            );
        }

        Ok(Self {
            client,
            bucket: cfg.minio_bucket.clone(),
            cancel,
            op_timeout: cfg.stream_timeout,
        })
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), ObjectStoreError> {
        let mut req = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body));
        if let Some(content_type) = content_type {
            req = req.content_type(content_type);
        }

        tokio::select! {
            _ = self.cancel.cancelled() => Err(ObjectStoreError::Cancelled),
            res = tokio::time::timeout(self.op_timeout, req.send()) => match res {
                Ok(inner) => inner.map(|_| ()).map_err(|err| {
                    ObjectStoreError::Backend(format!("s3 put_object failed for {key}: {err}"))
                }),
                Err(_) => Err(ObjectStoreError::Backend(format!(
                    "s3 put_object timed out for {key}"
                ))),
            },
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload_chunk(
        &self,
        stream_id: &str,
        chunk_idx: u64,
        data: &[u8],
    ) -> Result<(), ObjectStoreError> {
        let key = chunk_object_key(stream_id, chunk_idx);
        self.put(&key, data.to_vec(), None).await
    }

    async fn upload_metadata(
        &self,
        stream_id: &str,
        metadata: &[u8],
    ) -> Result<(), ObjectStoreError> {
        let key = metadata_object_key(stream_id);
        self.put(&key, metadata.to_vec(), Some("application/json"))
            .await
    }
}
