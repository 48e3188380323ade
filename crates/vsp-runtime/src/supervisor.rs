use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use vsp_core::config::Config;
use vsp_observe::metrics::Metrics;
use vsp_store::{CheckpointStore, ObjectStore};

use crate::processor::FileProcessor;
use crate::watcher::StabilityDetector;

/// Detected paths queued between the detector and the worker pool. A full
/// queue blocks the detector's send, which backpressures detection.
const PATH_CHANNEL_CAPACITY: usize = 100;

/// Starts the detector and the worker pool and blocks until cancellation,
/// then waits for every worker to finish its in-flight file.
///
/// Detector bootstrap failures (watcher creation, missing watch dir) cancel
/// the token so the whole process shuts down.
pub async fn run(
    cfg: Config,
    metrics: Arc<Metrics>,
    checkpoints: Arc<dyn CheckpointStore>,
    objects: Arc<dyn ObjectStore>,
    cancel: CancellationToken,
) -> Result<()> {
    let cfg = Arc::new(cfg);
    let (tx, rx) = mpsc::channel::<PathBuf>(PATH_CHANNEL_CAPACITY);

    let detector = StabilityDetector::new(
        cfg.clone(),
        checkpoints.clone(),
        metrics.clone(),
        tx,
        cancel.clone(),
    );
    let detector_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = detector.run().await;
            if let Err(err) = &result {
                error!(error = %err, "stability detector failed");
                cancel.cancel();
            }
            result
        })
    };

    let processor = Arc::new(FileProcessor::new(
        cfg.clone(),
        checkpoints,
        objects,
        metrics.clone(),
    ));
    let rx = Arc::new(tokio::sync::Mutex::new(rx));

    let worker_count = cfg.effective_worker_count();
    info!(worker_count, "launching workers");

    let mut workers = JoinSet::new();
    for worker_id in 0..worker_count {
        let rx = rx.clone();
        let processor = processor.clone();
        let metrics = metrics.clone();
        let cancel = cancel.clone();
        workers.spawn(async move {
            info!(worker_id, "worker started");
            loop {
                let path = tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(worker_id, "worker shutting down");
                        return;
                    }
                    path = async { rx.lock().await.recv().await } => match path {
                        Some(path) => path,
                        None => return,
                    },
                };

                info!(worker_id, path = %path.display(), "worker picked up file");
                metrics.files_in_progress.inc();
                let started = Instant::now();
                processor.process(&path).await;
                metrics.files_in_progress.dec();
                metrics
                    .file_processing_duration
                    .observe(started.elapsed().as_secs_f64());
            }
        });
    }

    cancel.cancelled().await;
    info!("waiting for workers to finish");
    while workers.join_next().await.is_some() {}
    if let Ok(result) = detector_task.await {
        result?;
    }
    info!("all workers finished, shutdown complete");
    Ok(())
}
