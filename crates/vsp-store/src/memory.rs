use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    chunk_object_key, chunk_uploaded_key, metadata_object_key, stream_progress_key,
    stream_status_key, CheckpointError, CheckpointStore, ObjectStore, ObjectStoreError,
    STATUS_COMPLETED, STREAM_STATUS_PREFIX,
};

/// HashMap-backed checkpoint store for tests and offline runs.
///
/// TTLs are recorded but never enforced; tests inspect them through
/// [`MemoryCheckpointStore::ttl`].
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    state: Mutex<KvState>,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct KvState {
    values: HashMap<String, String>,
    ttls: HashMap<String, Duration>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            state: Mutex::new(KvState::default()),
            cancel,
        }
    }

    /// Raw value currently stored under `key`, if any.
    pub fn value(&self, key: &str) -> Option<String> {
        self.locked().values.get(key).cloned()
    }

    /// TTL recorded for `key`, if any.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.locked().ttls.get(key).copied()
    }

    fn locked(&self) -> MutexGuard<'_, KvState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_cancelled(&self) -> Result<(), CheckpointError> {
        if self.cancel.is_cancelled() {
            Err(CheckpointError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn set_chunk_uploaded(
        &self,
        stream_id: &str,
        chunk_idx: u64,
    ) -> Result<(), CheckpointError> {
        self.check_cancelled()?;
        self.locked()
            .values
            .insert(chunk_uploaded_key(stream_id, chunk_idx), "1".to_string());
        Ok(())
    }

    async fn is_chunk_uploaded(
        &self,
        stream_id: &str,
        chunk_idx: u64,
    ) -> Result<bool, CheckpointError> {
        self.check_cancelled()?;
        let key = chunk_uploaded_key(stream_id, chunk_idx);
        let state = self.locked();
        Ok(matches!(
            state.values.get(&key).map(String::as_str),
            Some("1") | Some("true")
        ))
    }

    async fn set_stream_progress(
        &self,
        stream_id: &str,
        chunk_idx: u64,
    ) -> Result<(), CheckpointError> {
        self.check_cancelled()?;
        self.locked()
            .values
            .insert(stream_progress_key(stream_id), chunk_idx.to_string());
        Ok(())
    }

    async fn get_stream_progress(&self, stream_id: &str) -> Result<u64, CheckpointError> {
        self.check_cancelled()?;
        let state = self.locked();
        Ok(state
            .values
            .get(&stream_progress_key(stream_id))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    async fn set_stream_status(
        &self,
        stream_id: &str,
        status: &str,
    ) -> Result<(), CheckpointError> {
        self.check_cancelled()?;
        self.locked()
            .values
            .insert(stream_status_key(stream_id), status.to_string());
        Ok(())
    }

    async fn get_stream_status(&self, stream_id: &str) -> Result<String, CheckpointError> {
        self.check_cancelled()?;
        let state = self.locked();
        Ok(state
            .values
            .get(&stream_status_key(stream_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn set_stream_ttl(&self, stream_id: &str, ttl: Duration) -> Result<(), CheckpointError> {
        self.check_cancelled()?;
        self.locked()
            .ttls
            .insert(stream_status_key(stream_id), ttl);
        Ok(())
    }

    async fn scan_incomplete_streams(&self) -> Result<Vec<String>, CheckpointError> {
        self.check_cancelled()?;
        let state = self.locked();
        let mut stream_ids: Vec<String> = state
            .values
            .iter()
            .filter(|(key, value)| {
                key.starts_with(STREAM_STATUS_PREFIX) && value.as_str() != STATUS_COMPLETED
            })
            .filter_map(|(key, _)| key.strip_prefix(STREAM_STATUS_PREFIX))
            .map(str::to_string)
            .collect();
        stream_ids.sort();
        Ok(stream_ids)
    }

    async fn get_value(&self, key: &str) -> Result<String, CheckpointError> {
        self.check_cancelled()?;
        Ok(self.locked().values.get(key).cloned().unwrap_or_default())
    }

    async fn set_value(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CheckpointError> {
        self.check_cancelled()?;
        let mut state = self.locked();
        state.values.insert(key.to_string(), value.to_string());
        match ttl {
            Some(ttl) => {
                state.ttls.insert(key.to_string(), ttl);
            }
            None => {
                state.ttls.remove(key);
            }
        }
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<(), CheckpointError> {
        self.check_cancelled()?;
        let mut state = self.locked();
        state.values.remove(key);
        state.ttls.remove(key);
        Ok(())
    }
}

/// In-memory object store recording every upload attempt, with per-key
/// one-shot failure injection for retry tests.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    state: Mutex<ObjectState>,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct ObjectState {
    objects: HashMap<String, Vec<u8>>,
    upload_attempts: HashMap<String, u64>,
    fail_next: HashSet<String>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next upload of `key` fail once.
    pub fn fail_next_upload(&self, key: &str) {
        self.locked().fail_next.insert(key.to_string());
    }

    /// Bytes last stored under `key`, if any.
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.locked().objects.get(key).cloned()
    }

    /// Sorted list of stored object keys.
    pub fn object_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.locked().objects.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of upload attempts (including failed ones) for `key`.
    pub fn upload_attempts(&self, key: &str) -> u64 {
        self.locked().upload_attempts.get(key).copied().unwrap_or(0)
    }

    pub fn chunk_attempts(&self, stream_id: &str, chunk_idx: u64) -> u64 {
        self.upload_attempts(&chunk_object_key(stream_id, chunk_idx))
    }

    pub fn metadata_attempts(&self, stream_id: &str) -> u64 {
        self.upload_attempts(&metadata_object_key(stream_id))
    }

    fn locked(&self) -> MutexGuard<'_, ObjectState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn put(&self, key: String, data: &[u8]) -> Result<(), ObjectStoreError> {
        if self.cancel.is_cancelled() {
            return Err(ObjectStoreError::Cancelled);
        }
        let mut state = self.locked();
        *state.upload_attempts.entry(key.clone()).or_insert(0) += 1;
        if state.fail_next.remove(&key) {
            return Err(ObjectStoreError::Backend(format!(
                "injected failure for {key}"
            )));
        }
        state.objects.insert(key, data.to_vec());
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload_chunk(
        &self,
        stream_id: &str,
        chunk_idx: u64,
        data: &[u8],
    ) -> Result<(), ObjectStoreError> {
        self.put(chunk_object_key(stream_id, chunk_idx), data)
    }

    async fn upload_metadata(
        &self,
        stream_id: &str,
        metadata: &[u8],
    ) -> Result<(), ObjectStoreError> {
        self.put(metadata_object_key(stream_id), metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chunk_bits_round_trip() {
        let store = MemoryCheckpointStore::new();
        assert!(!store.is_chunk_uploaded("v.mp4", 0).await.unwrap());
        store.set_chunk_uploaded("v.mp4", 0).await.unwrap();
        assert!(store.is_chunk_uploaded("v.mp4", 0).await.unwrap());
        assert!(!store.is_chunk_uploaded("v.mp4", 1).await.unwrap());
    }

    #[tokio::test]
    async fn missing_keys_read_as_defaults() {
        let store = MemoryCheckpointStore::new();
        assert_eq!(store.get_value("file_hash:v.mp4").await.unwrap(), "");
        assert_eq!(store.get_stream_status("v.mp4").await.unwrap(), "");
        assert_eq!(store.get_stream_progress("v.mp4").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn scan_skips_completed_streams() {
        let store = MemoryCheckpointStore::new();
        store
            .set_stream_status("a.mp4", STATUS_COMPLETED)
            .await
            .unwrap();
        store
            .set_stream_status("b.mp4", crate::STATUS_IN_PROGRESS)
            .await
            .unwrap();
        store.set_stream_status("c.mkv", "uploading").await.unwrap();

        let incomplete = store.scan_incomplete_streams().await.unwrap();
        assert_eq!(incomplete, vec!["b.mp4".to_string(), "c.mkv".to_string()]);
    }

    #[tokio::test]
    async fn ttl_is_recorded_for_status_key() {
        let store = MemoryCheckpointStore::new();
        store
            .set_stream_status("v.mp4", STATUS_COMPLETED)
            .await
            .unwrap();
        store
            .set_stream_ttl("v.mp4", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            store.ttl(&stream_status_key("v.mp4")),
            Some(Duration::from_secs(60))
        );
    }

    #[tokio::test]
    async fn delete_clears_value_and_ttl() {
        let store = MemoryCheckpointStore::new();
        store
            .set_value("file_hash:v.mp4", "abc", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        store.delete_key("file_hash:v.mp4").await.unwrap();
        assert_eq!(store.value("file_hash:v.mp4"), None);
        assert_eq!(store.ttl("file_hash:v.mp4"), None);
    }

    #[tokio::test]
    async fn cancelled_store_rejects_operations() {
        let cancel = CancellationToken::new();
        let store = MemoryCheckpointStore::with_cancel(cancel.clone());
        cancel.cancel();
        assert!(matches!(
            store.get_value("k").await,
            Err(CheckpointError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn object_store_counts_attempts_and_injects_failures() {
        let store = MemoryObjectStore::new();
        store.fail_next_upload(&chunk_object_key("v.mp4", 0));

        let err = store.upload_chunk("v.mp4", 0, b"data").await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::Backend(_)));
        assert_eq!(store.chunk_attempts("v.mp4", 0), 1);
        assert!(store.object(&chunk_object_key("v.mp4", 0)).is_none());

        store.upload_chunk("v.mp4", 0, b"data").await.unwrap();
        assert_eq!(store.chunk_attempts("v.mp4", 0), 2);
        assert_eq!(
            store.object(&chunk_object_key("v.mp4", 0)),
            Some(b"data".to_vec())
        );
    }
}
