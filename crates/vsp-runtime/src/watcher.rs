use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vsp_core::config::{is_allowed_extension, Config};
use vsp_core::fingerprint::file_fingerprint;
use vsp_core::types::stream_id_for;
use vsp_observe::metrics::Metrics;
use vsp_store::{file_hash_key, CheckpointStore, STATUS_COMPLETED};

/// Interval between sweeps of the activity map for stable files.
const STABILITY_TICK: Duration = Duration::from_secs(1);

/// Per-path bookkeeping, guarded by a single mutex. Fingerprint I/O happens
/// outside the critical sections.
#[derive(Debug, Default)]
struct WatchState {
    last_activity: HashMap<PathBuf, Instant>,
    known_fingerprint: HashMap<PathBuf, String>,
}

/// Watches the configured directory and emits a path once it has been
/// quiescent for the stability window and is not already completed at its
/// current fingerprint.
///
/// Duplicate emission after renewed activity is expected; the processor's
/// idempotency absorbs it.
pub struct StabilityDetector {
    cfg: Arc<Config>,
    checkpoints: Arc<dyn CheckpointStore>,
    metrics: Arc<Metrics>,
    tx: mpsc::Sender<PathBuf>,
    cancel: CancellationToken,
    state: Mutex<WatchState>,
}

impl StabilityDetector {
    pub fn new(
        cfg: Arc<Config>,
        checkpoints: Arc<dyn CheckpointStore>,
        metrics: Arc<Metrics>,
        tx: mpsc::Sender<PathBuf>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            checkpoints,
            metrics,
            tx,
            cancel,
            state: Mutex::new(WatchState::default()),
        }
    }

    /// Runs until cancellation. Watcher creation or directory-watch failures
    /// are returned to the caller and are fatal at startup.
    pub async fn run(&self) -> anyhow::Result<()> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let mut fs_watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
                let _ = event_tx.send(res);
            })?;
        fs_watcher.watch(&self.cfg.watch_dir, RecursiveMode::NonRecursive)?;
        info!(dir = %self.cfg.watch_dir.display(), "watching directory");

        self.seed_existing_files();

        let window = self.cfg.stability_threshold;
        let start = tokio::time::Instant::now();
        let mut rescan = tokio::time::interval_at(start + window, window);
        let mut tick = tokio::time::interval_at(start + STABILITY_TICK, STABILITY_TICK);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                event = event_rx.recv() => match event {
                    Some(Ok(event)) => self.record_event(&event),
                    Some(Err(err)) => error!(error = %err, "watcher error"),
                    None => return Ok(()),
                },
                _ = rescan.tick() => self.rescan_files(),
                _ = tick.tick() => {
                    if !self.sweep_stable_files(window).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Refreshes `last_activity` for every path touched by a filesystem
    /// event. Extension filtering happens at sweep time.
    fn record_event(&self, event: &Event) {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return;
        }
        let now = Instant::now();
        let mut state = self.locked();
        for path in &event.paths {
            state.last_activity.insert(path.clone(), now);
        }
    }

    /// Startup pass: every pre-existing matching file is backdated so the
    /// first stability tick considers it immediately stable.
    fn seed_existing_files(&self) {
        let entries = match std::fs::read_dir(&self.cfg.watch_dir) {
            Ok(entries) => entries,
            Err(err) => {
                error!(error = %err, dir = %self.cfg.watch_dir.display(), "failed to scan watch dir");
                return;
            }
        };
        let backdated = backdated_instant(self.cfg.stability_threshold);
        let mut state = self.locked();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && is_allowed_extension(&path, &self.cfg.video_file_formats) {
                state.last_activity.insert(path, backdated);
            }
        }
    }

    /// Periodic rescan: any matching file whose fingerprint is new or differs
    /// from the last observed one is backdated and its fingerprint recorded.
    /// Catches rewrites that produced no (or missed) filesystem events.
    fn rescan_files(&self) {
        let entries = match std::fs::read_dir(&self.cfg.watch_dir) {
            Ok(entries) => entries,
            Err(err) => {
                error!(error = %err, dir = %self.cfg.watch_dir.display(), "failed to rescan watch dir");
                return;
            }
        };
        let backdated = backdated_instant(self.cfg.stability_threshold);
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || !is_allowed_extension(&path, &self.cfg.video_file_formats) {
                continue;
            }
            let hash = file_fingerprint(&path);
            let mut state = self.locked();
            let changed = state
                .known_fingerprint
                .get(&path)
                .map(|prev| *prev != hash)
                .unwrap_or(true);
            if changed {
                state.last_activity.insert(path.clone(), backdated);
                state.known_fingerprint.insert(path, hash);
            }
        }
    }

    /// Emits every path quiet for longer than the window, after the
    /// completed-fingerprint filter. Entries are dropped from the activity
    /// map whether they are emitted or suppressed. Returns `false` once the
    /// path channel is closed.
    async fn sweep_stable_files(&self, window: Duration) -> bool {
        let now = Instant::now();
        let due: Vec<PathBuf> = {
            let mut state = self.locked();
            let due: Vec<PathBuf> = state
                .last_activity
                .iter()
                .filter(|(_, last)| now.duration_since(**last) > window)
                .map(|(path, _)| path.clone())
                .collect();
            for path in &due {
                state.last_activity.remove(path);
            }
            due
        };

        for path in due {
            if !is_allowed_extension(&path, &self.cfg.video_file_formats) {
                continue;
            }
            if !self.should_emit(&path).await {
                continue;
            }
            if self.tx.send(path).await.is_err() {
                warn!("path channel closed, stopping detector");
                return false;
            }
            self.metrics.files_detected.inc();
        }
        true
    }

    /// Suppresses a candidate only when the stored fingerprint matches the
    /// live one and the stream already completed. Checkpoint errors fail
    /// open: the path is emitted and the processor re-checks.
    async fn should_emit(&self, path: &Path) -> bool {
        let stream_id = stream_id_for(path);
        let hash = file_fingerprint(path);
        let prev = match self.checkpoints.get_value(&file_hash_key(&stream_id)).await {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, %stream_id, "checkpoint lookup failed during filtering");
                String::new()
            }
        };
        let status = match self.checkpoints.get_stream_status(&stream_id).await {
            Ok(status) => status,
            Err(err) => {
                warn!(error = %err, %stream_id, "status lookup failed during filtering");
                String::new()
            }
        };
        if prev == hash && status == STATUS_COMPLETED {
            info!(
                path = %path.display(),
                %stream_id,
                "file already processed and fingerprint unchanged, skipping"
            );
            return false;
        }
        true
    }

    fn locked(&self) -> MutexGuard<'_, WatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn backdated_instant(window: Duration) -> Instant {
    let now = Instant::now();
    now.checked_sub(2 * window).unwrap_or(now)
}
