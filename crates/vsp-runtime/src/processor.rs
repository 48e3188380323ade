use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info};

use vsp_core::chunker::chunk_stream;
use vsp_core::config::Config;
use vsp_core::fingerprint::file_fingerprint;
use vsp_core::types::{stream_id_for, ChunkMeta, StreamMetadata, CHECKPOINT_TTL};
use vsp_observe::metrics::Metrics;
use vsp_store::{
    file_hash_key, stream_status_key, CheckpointStore, ObjectStore, STATUS_COMPLETED,
};

/// Per-file state machine: fingerprint check, sequential chunk loop with
/// checkpoint reconciliation, metadata finalization.
///
/// Errors are handled locally; nothing short of successful completion moves
/// the stream status to `completed`, so a failed run is simply re-attempted
/// on the next detection and uploads only what the checkpoint store still
/// reports missing.
pub struct FileProcessor {
    cfg: Arc<Config>,
    checkpoints: Arc<dyn CheckpointStore>,
    objects: Arc<dyn ObjectStore>,
    metrics: Arc<Metrics>,
}

impl FileProcessor {
    pub fn new(
        cfg: Arc<Config>,
        checkpoints: Arc<dyn CheckpointStore>,
        objects: Arc<dyn ObjectStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cfg,
            checkpoints,
            objects,
            metrics,
        }
    }

    pub async fn process(&self, path: &Path) {
        let stream_id = stream_id_for(path);
        info!(path = %path.display(), %stream_id, "processing file");

        let hash = file_fingerprint(path);
        if hash.is_empty() {
            error!(path = %path.display(), "failed to fingerprint file, skipping");
            return;
        }

        let hash_key = file_hash_key(&stream_id);
        let prev = self.checkpoints.get_value(&hash_key).await.unwrap_or_default();
        let status = self
            .checkpoints
            .get_stream_status(&stream_id)
            .await
            .unwrap_or_default();
        if prev == hash && status == STATUS_COMPLETED {
            info!(%stream_id, "file already processed and fingerprint unchanged, skipping");
            return;
        }

        // A different on-disk fingerprint invalidates all prior progress for
        // this stream. Old chunk_uploaded keys are left behind; they expire
        // with nothing or get overwritten by the new run.
        if !prev.is_empty() && prev != hash {
            info!(%stream_id, "file fingerprint changed, resetting progress");
            let _ = self
                .checkpoints
                .delete_key(&stream_status_key(&stream_id))
                .await;
            let _ = self.checkpoints.set_stream_progress(&stream_id, 0).await;
        }

        let _ = self
            .checkpoints
            .set_value(&hash_key, &hash, Some(CHECKPOINT_TTL))
            .await;

        let mut chunks = match chunk_stream(path, self.cfg.chunk_size) {
            Ok(rx) => rx,
            Err(err) => {
                error!(error = %err, path = %path.display(), "chunking failed");
                self.metrics.upload_failures.inc();
                return;
            }
        };

        let mut chunk_metas: Vec<ChunkMeta> = Vec::new();
        let mut total_size: i64 = 0;
        let mut chunk_failures = false;
        while let Some(chunk) = chunks.recv().await {
            let uploaded = match self
                .checkpoints
                .is_chunk_uploaded(&stream_id, chunk.index)
                .await
            {
                Ok(uploaded) => uploaded,
                Err(err) => {
                    // The chunk is skipped for this pass, not re-attempted.
                    error!(error = %err, chunk = chunk.index, "checkpoint read failed");
                    self.metrics.redis_errors.inc();
                    chunk_failures = true;
                    continue;
                }
            };
            if uploaded {
                debug!(chunk = chunk.index, "chunk already uploaded, skipping");
                continue;
            }

            let started = Instant::now();
            if let Err(err) = self
                .objects
                .upload_chunk(&stream_id, chunk.index, &chunk.data)
                .await
            {
                error!(error = %err, chunk = chunk.index, "chunk upload failed");
                self.metrics.upload_failures.inc();
                chunk_failures = true;
                continue;
            }
            self.metrics
                .chunk_upload_duration
                .observe(started.elapsed().as_secs_f64());

            // Object first, checkpoint second: a crash between the two means
            // one redundant re-upload, never a lost chunk.
            if let Err(err) = self
                .checkpoints
                .set_chunk_uploaded(&stream_id, chunk.index)
                .await
            {
                error!(error = %err, chunk = chunk.index, "checkpoint write failed");
                self.metrics.redis_errors.inc();
            }

            total_size += chunk.data.len() as i64;
            chunk_metas.push(ChunkMeta {
                index: chunk.index,
                checksum: chunk.checksum,
                timestamp: chunk.timestamp,
            });
            self.metrics.chunks_uploaded.inc();
            let _ = self
                .checkpoints
                .set_stream_progress(&stream_id, chunk.index)
                .await;
        }

        let meta = StreamMetadata {
            total_size,
            chunks: chunk_metas,
            duration_estimate: None,
        };
        match serde_json::to_vec(&meta) {
            Ok(bytes) => {
                if let Err(err) = self.objects.upload_metadata(&stream_id, &bytes).await {
                    error!(error = %err, %stream_id, "metadata upload failed");
                    self.metrics.upload_failures.inc();
                }
            }
            Err(err) => {
                error!(error = %err, %stream_id, "metadata serialization failed");
                self.metrics.upload_failures.inc();
            }
        }

        // A run with failed or skipped chunks stays implicitly in progress so
        // the next detection pass retries the missing indices. Metadata
        // upload failures alone do not hold completion back.
        if chunk_failures {
            info!(
                path = %path.display(),
                %stream_id,
                "file processing incomplete, awaiting re-detection"
            );
            return;
        }

        let _ = self
            .checkpoints
            .set_stream_status(&stream_id, STATUS_COMPLETED)
            .await;
        let _ = self.checkpoints.set_stream_ttl(&stream_id, CHECKPOINT_TTL).await;
        info!(path = %path.display(), %stream_id, "file processing complete");
        self.metrics.last_file_processed.set(Utc::now().timestamp());
    }
}
