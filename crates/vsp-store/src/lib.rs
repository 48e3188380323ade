#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod memory;
pub mod redis_store;
pub mod s3;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_IN_PROGRESS: &str = "in_progress";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("operation cancelled")]
    Cancelled,
    #[error("checkpoint store error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("operation cancelled")]
    Cancelled,
    #[error("object store error: {0}")]
    Backend(String),
}

/// Typed facade over the key-value checkpoint store.
///
/// All operations observe the ambient cancellation token captured at
/// construction and fail with [`CheckpointError::Cancelled`] once it fires.
/// Reads of missing keys yield empty-string / `false` / `0`, never an error.
#[async_trait]
pub trait CheckpointStore: Send + Sync + 'static {
    /// Idempotent; the chunk bit carries no expiry.
    async fn set_chunk_uploaded(&self, stream_id: &str, chunk_idx: u64)
        -> Result<(), CheckpointError>;
    async fn is_chunk_uploaded(&self, stream_id: &str, chunk_idx: u64)
        -> Result<bool, CheckpointError>;

    async fn set_stream_progress(&self, stream_id: &str, chunk_idx: u64)
        -> Result<(), CheckpointError>;
    async fn get_stream_progress(&self, stream_id: &str) -> Result<u64, CheckpointError>;

    async fn set_stream_status(&self, stream_id: &str, status: &str)
        -> Result<(), CheckpointError>;
    /// Empty string when no status is recorded.
    async fn get_stream_status(&self, stream_id: &str) -> Result<String, CheckpointError>;
    /// Applies `ttl` to the status key.
    async fn set_stream_ttl(&self, stream_id: &str, ttl: Duration) -> Result<(), CheckpointError>;

    /// Enumerates stream ids under `stream_status:*` whose value is not
    /// `completed`.
    async fn scan_incomplete_streams(&self) -> Result<Vec<String>, CheckpointError>;

    async fn get_value(&self, key: &str) -> Result<String, CheckpointError>;
    async fn set_value(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CheckpointError>;
    async fn delete_key(&self, key: &str) -> Result<(), CheckpointError>;
}

/// Blob sink for chunk and metadata objects. Both operations are
/// unconditional overwrites; errors are surfaced verbatim and no retry policy
/// is implemented here.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn upload_chunk(
        &self,
        stream_id: &str,
        chunk_idx: u64,
        data: &[u8],
    ) -> Result<(), ObjectStoreError>;
    async fn upload_metadata(
        &self,
        stream_id: &str,
        metadata: &[u8],
    ) -> Result<(), ObjectStoreError>;
}

// Checkpoint key layout. The zero-padding width is part of the wire format;
// scanners and operators depend on it.

pub const STREAM_STATUS_PREFIX: &str = "stream_status:";

pub fn chunk_uploaded_key(stream_id: &str, chunk_idx: u64) -> String {
    format!("chunk_uploaded:{stream_id}:{chunk_idx:05}")
}

pub fn stream_status_key(stream_id: &str) -> String {
    format!("{STREAM_STATUS_PREFIX}{stream_id}")
}

pub fn stream_progress_key(stream_id: &str) -> String {
    format!("stream_progress:{stream_id}")
}

pub fn file_hash_key(stream_id: &str) -> String {
    format!("file_hash:{stream_id}")
}

// Object key layout, matching the checkpoint padding width.

pub fn chunk_object_key(stream_id: &str, chunk_idx: u64) -> String {
    format!("{stream_id}/chunk-{chunk_idx:05}")
}

pub fn metadata_object_key(stream_id: &str) -> String {
    format!("{stream_id}/metadata.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_keys_are_zero_padded_to_width_five() {
        assert_eq!(chunk_uploaded_key("v.mp4", 0), "chunk_uploaded:v.mp4:00000");
        assert_eq!(chunk_uploaded_key("v.mp4", 42), "chunk_uploaded:v.mp4:00042");
        assert_eq!(
            chunk_uploaded_key("v.mp4", 123_456),
            "chunk_uploaded:v.mp4:123456"
        );
        assert_eq!(chunk_object_key("v.mp4", 7), "v.mp4/chunk-00007");
    }

    #[test]
    fn stream_keys_carry_their_prefixes() {
        assert_eq!(stream_status_key("v.mp4"), "stream_status:v.mp4");
        assert_eq!(stream_progress_key("v.mp4"), "stream_progress:v.mp4");
        assert_eq!(file_hash_key("v.mp4"), "file_hash:v.mp4");
        assert_eq!(metadata_object_key("v.mp4"), "v.mp4/metadata.json");
    }
}
