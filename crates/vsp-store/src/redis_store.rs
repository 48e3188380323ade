use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio_util::sync::CancellationToken;

use vsp_core::config::Config;

use crate::{
    chunk_uploaded_key, stream_progress_key, stream_status_key, CheckpointError, CheckpointStore,
    STATUS_COMPLETED, STREAM_STATUS_PREFIX,
};

/// Redis-backed checkpoint store.
///
/// Holds a multiplexed connection manager; individual operations clone it, so
/// the store is cheap to share behind an `Arc`. Every operation races the
/// ambient cancellation token and the configured per-operation deadline.
#[derive(Clone)]
pub struct RedisCheckpointStore {
    conn: ConnectionManager,
    cancel: CancellationToken,
    op_timeout: Duration,
}

impl RedisCheckpointStore {
    pub async fn connect(cfg: &Config, cancel: CancellationToken) -> Result<Self, CheckpointError> {
        let url = redis_url(&cfg.redis_addr, &cfg.redis_password, cfg.redis_db);
        let client = redis::Client::open(url)
            .map_err(|e| CheckpointError::Backend(format!("redis client init failed: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| CheckpointError::Backend(format!("redis connect failed: {e}")))?;
        Ok(Self {
            conn,
            cancel,
            op_timeout: cfg.stream_timeout,
        })
    }

    async fn guarded<T, F>(&self, fut: F) -> Result<T, CheckpointError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(CheckpointError::Cancelled),
            res = tokio::time::timeout(self.op_timeout, fut) => match res {
                Ok(inner) => inner.map_err(|e| CheckpointError::Backend(e.to_string())),
                Err(_) => Err(CheckpointError::Backend("operation timed out".to_string())),
            },
        }
    }
}

fn redis_url(addr: &str, password: &str, db: i64) -> String {
    if password.is_empty() {
        format!("redis://{addr}/{db}")
    } else {
        format!("redis://:{password}@{addr}/{db}")
    }
}

#[async_trait]
impl CheckpointStore for RedisCheckpointStore {
    async fn set_chunk_uploaded(
        &self,
        stream_id: &str,
        chunk_idx: u64,
    ) -> Result<(), CheckpointError> {
        let key = chunk_uploaded_key(stream_id, chunk_idx);
        let mut conn = self.conn.clone();
        self.guarded(async move { conn.set::<_, _, ()>(&key, "1").await })
            .await
    }

    async fn is_chunk_uploaded(
        &self,
        stream_id: &str,
        chunk_idx: u64,
    ) -> Result<bool, CheckpointError> {
        let key = chunk_uploaded_key(stream_id, chunk_idx);
        let mut conn = self.conn.clone();
        let value = self
            .guarded(async move { conn.get::<_, Option<String>>(&key).await })
            .await?;
        Ok(matches!(value.as_deref(), Some("1") | Some("true")))
    }

    async fn set_stream_progress(
        &self,
        stream_id: &str,
        chunk_idx: u64,
    ) -> Result<(), CheckpointError> {
        let key = stream_progress_key(stream_id);
        let mut conn = self.conn.clone();
        self.guarded(async move { conn.set::<_, _, ()>(&key, chunk_idx).await })
            .await
    }

    async fn get_stream_progress(&self, stream_id: &str) -> Result<u64, CheckpointError> {
        let key = stream_progress_key(stream_id);
        let mut conn = self.conn.clone();
        let value = self
            .guarded(async move { conn.get::<_, Option<u64>>(&key).await })
            .await?;
        Ok(value.unwrap_or(0))
    }

    async fn set_stream_status(
        &self,
        stream_id: &str,
        status: &str,
    ) -> Result<(), CheckpointError> {
        let key = stream_status_key(stream_id);
        let status = status.to_string();
        let mut conn = self.conn.clone();
        self.guarded(async move { conn.set::<_, _, ()>(&key, status).await })
            .await
    }

    async fn get_stream_status(&self, stream_id: &str) -> Result<String, CheckpointError> {
        let key = stream_status_key(stream_id);
        let mut conn = self.conn.clone();
        let value = self
            .guarded(async move { conn.get::<_, Option<String>>(&key).await })
            .await?;
        Ok(value.unwrap_or_default())
    }

    async fn set_stream_ttl(&self, stream_id: &str, ttl: Duration) -> Result<(), CheckpointError> {
        let key = stream_status_key(stream_id);
        let secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let mut conn = self.conn.clone();
        self.guarded(async move { conn.expire::<_, ()>(&key, secs).await })
            .await
    }

    async fn scan_incomplete_streams(&self) -> Result<Vec<String>, CheckpointError> {
        let mut conn = self.conn.clone();
        self.guarded(async move {
            let pattern = format!("{STREAM_STATUS_PREFIX}*");
            let mut stream_ids = Vec::new();
            let mut cursor: u64 = 0;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .query_async(&mut conn)
                    .await?;
                for key in keys {
                    // A failed status read skips the key rather than failing
                    // the whole scan.
                    match conn.get::<_, Option<String>>(&key).await {
                        Ok(status) if status.as_deref() != Some(STATUS_COMPLETED) => {
                            if let Some(id) = key.strip_prefix(STREAM_STATUS_PREFIX) {
                                stream_ids.push(id.to_string());
                            }
                        }
                        _ => {}
                    }
                }
                cursor = next;
                if cursor == 0 {
                    break;
                }
            }
            Ok(stream_ids)
        })
        .await
    }

    async fn get_value(&self, key: &str) -> Result<String, CheckpointError> {
        let key = key.to_string();
        let mut conn = self.conn.clone();
        let value = self
            .guarded(async move { conn.get::<_, Option<String>>(&key).await })
            .await?;
        Ok(value.unwrap_or_default())
    }

    async fn set_value(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CheckpointError> {
        let key = key.to_string();
        let value = value.to_string();
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => {
                let secs = ttl.as_secs().max(1);
                self.guarded(async move { conn.set_ex::<_, _, ()>(&key, value, secs).await })
                    .await
            }
            None => {
                self.guarded(async move { conn.set::<_, _, ()>(&key, value).await })
                    .await
            }
        }
    }

    async fn delete_key(&self, key: &str) -> Result<(), CheckpointError> {
        let key = key.to_string();
        let mut conn = self.conn.clone();
        self.guarded(async move { conn.del::<_, ()>(&key).await })
            .await
    }
}
