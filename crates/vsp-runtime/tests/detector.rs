use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vsp_core::config::Config;
use vsp_core::fingerprint::file_fingerprint;
use vsp_observe::metrics::Metrics;
use vsp_runtime::watcher::StabilityDetector;
use vsp_store::memory::MemoryCheckpointStore;
use vsp_store::{file_hash_key, CheckpointStore, STATUS_COMPLETED};

struct Harness {
    metrics: Arc<Metrics>,
    rx: mpsc::Receiver<std::path::PathBuf>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<anyhow::Result<()>>,
}

fn start_detector(watch_dir: &Path, checkpoints: Arc<MemoryCheckpointStore>) -> Harness {
    let cfg = Config {
        watch_dir: watch_dir.to_path_buf(),
        stability_threshold: Duration::from_secs(2),
        ..Config::default()
    };
    let metrics = Arc::new(Metrics::new().unwrap());
    let (tx, rx) = mpsc::channel(10);
    let cancel = CancellationToken::new();
    let detector = Arc::new(StabilityDetector::new(
        Arc::new(cfg),
        checkpoints.clone() as Arc<dyn CheckpointStore>,
        metrics.clone(),
        tx,
        cancel.clone(),
    ));
    let task = tokio::spawn(async move { detector.run().await });
    Harness {
        metrics,
        rx,
        cancel,
        task,
    }
}

async fn shutdown(harness: Harness) {
    harness.cancel.cancel();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn written_file_is_emitted_exactly_once_after_the_window() {
    let dir = tempfile::tempdir().unwrap();
    let mut harness = start_detector(dir.path(), Arc::new(MemoryCheckpointStore::new()));

    // Let the watcher attach before producing events.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let video = dir.path().join("v.mp4");
    std::fs::write(&video, b"0123456789").unwrap();

    let emitted = tokio::time::timeout(Duration::from_secs(8), harness.rx.recv())
        .await
        .expect("expected an emission within the stability window")
        .unwrap();
    assert_eq!(emitted, video);
    assert_eq!(harness.metrics.files_detected.get(), 1);

    // Quiet file: no second emission.
    assert!(
        tokio::time::timeout(Duration::from_secs(3), harness.rx.recv())
            .await
            .is_err()
    );

    shutdown(harness).await;
}

#[tokio::test]
async fn completed_unchanged_file_is_suppressed() {
    let dir = tempfile::tempdir().unwrap();
    let video = dir.path().join("v.mp4");
    std::fs::write(&video, b"0123456789").unwrap();

    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    checkpoints
        .set_value(&file_hash_key("v.mp4"), &file_fingerprint(&video), None)
        .await
        .unwrap();
    checkpoints
        .set_stream_status("v.mp4", STATUS_COMPLETED)
        .await
        .unwrap();

    let mut harness = start_detector(dir.path(), checkpoints);

    assert!(
        tokio::time::timeout(Duration::from_secs(4), harness.rx.recv())
            .await
            .is_err(),
        "completed file with unchanged fingerprint must not be emitted"
    );
    assert_eq!(harness.metrics.files_detected.get(), 0);

    shutdown(harness).await;
}

#[tokio::test]
async fn disallowed_extension_is_never_emitted() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"not a video").unwrap();

    let mut harness = start_detector(dir.path(), Arc::new(MemoryCheckpointStore::new()));

    assert!(
        tokio::time::timeout(Duration::from_secs(4), harness.rx.recv())
            .await
            .is_err()
    );
    assert_eq!(harness.metrics.files_detected.get(), 0);

    shutdown(harness).await;
}
