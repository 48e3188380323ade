#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use vsp_core::config::{parse_video_formats, Config};
use vsp_observe::logging;
use vsp_observe::metrics::Metrics;
use vsp_observe::server::serve_metrics;
use vsp_runtime::supervisor;
use vsp_store::redis_store::RedisCheckpointStore;
use vsp_store::s3::S3ObjectStore;
use vsp_store::{CheckpointStore, ObjectStore};

/// Watches a directory for video files, slices stable files into checksummed
/// chunks, uploads them to S3/MinIO and checkpoints progress in Redis so
/// interrupted uploads resume where they left off.
#[derive(Debug, Parser)]
#[command(name = "vspd")]
struct Args {
    #[arg(long, env = "REDIS_ADDR", default_value = "localhost:6379")]
    redis_addr: String,

    #[arg(long, env = "REDIS_PASSWORD", default_value = "", hide_env_values = true)]
    redis_password: String,

    #[arg(long, env = "REDIS_DB", default_value_t = 0)]
    redis_db: i64,

    #[arg(long, env = "MINIO_ENDPOINT", default_value = "localhost:9000")]
    minio_endpoint: String,

    #[arg(long, env = "MINIO_ACCESS_KEY", default_value = "minioadmin")]
    minio_access_key: String,

    #[arg(
        long,
        env = "MINIO_SECRET_KEY",
        default_value = "minioadmin",
        hide_env_values = true
    )]
    minio_secret_key: String,

    #[arg(long, env = "MINIO_BUCKET", default_value = "video-streams")]
    minio_bucket: String,

    #[arg(long, env = "MINIO_USE_SSL", default_value_t = false)]
    minio_use_ssl: bool,

    #[arg(long, env = "WATCH_DIR", default_value = "./input_files")]
    watch_dir: PathBuf,

    /// Bytes per uploaded chunk.
    #[arg(long, env = "CHUNK_SIZE", default_value_t = 5 * 1024 * 1024)]
    chunk_size: usize,

    /// Seconds a file must stay free of filesystem events before it is
    /// considered stable.
    #[arg(long, env = "STABILITY_THRESHOLD", default_value_t = 15)]
    stability_threshold: u64,

    /// Per-operation deadline in seconds, applied inside the store adapters.
    #[arg(long, env = "STREAM_TIMEOUT", default_value_t = 30)]
    stream_timeout: u64,

    #[arg(long, env = "PROMETHEUS_PORT", default_value_t = 2112)]
    prometheus_port: u16,

    /// One of debug/info/warn/error; RUST_LOG overrides when set.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, env = "WORKER_COUNT", default_value_t = 4)]
    worker_count: usize,

    /// Comma-separated extensions; leading dot optional, case-insensitive.
    #[arg(long, env = "VIDEO_FILE_FORMATS", default_value = ".mp4,.mkv")]
    video_file_formats: String,
}

impl Args {
    fn into_config(self) -> Config {
        Config {
            redis_addr: self.redis_addr,
            redis_password: self.redis_password,
            redis_db: self.redis_db,
            minio_endpoint: self.minio_endpoint,
            minio_access_key: self.minio_access_key,
            minio_secret_key: self.minio_secret_key,
            minio_bucket: self.minio_bucket,
            minio_use_ssl: self.minio_use_ssl,
            watch_dir: self.watch_dir,
            chunk_size: self.chunk_size,
            stability_threshold: Duration::from_secs(self.stability_threshold),
            stream_timeout: Duration::from_secs(self.stream_timeout),
            prometheus_port: self.prometheus_port,
            log_level: self.log_level,
            worker_count: self.worker_count,
            video_file_formats: parse_video_formats(&self.video_file_formats),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Args::parse().into_config();
    logging::init_tracing(&cfg.log_level);
    info!(watch_dir = %cfg.watch_dir.display(), "starting video stream processor");

    let metrics = Arc::new(Metrics::new()?);
    let cancel = CancellationToken::new();

    {
        let metrics = metrics.clone();
        let cancel = cancel.clone();
        let port = cfg.prometheus_port;
        tokio::spawn(async move {
            if let Err(err) = serve_metrics(metrics, port, cancel).await {
                error!(error = %err, "metrics exporter failed");
            }
        });
    }

    spawn_signal_handler(cancel.clone());

    let checkpoints: Arc<dyn CheckpointStore> =
        Arc::new(RedisCheckpointStore::connect(&cfg, cancel.clone()).await?);
    let objects: Arc<dyn ObjectStore> =
        Arc::new(S3ObjectStore::connect(&cfg, cancel.clone()).await?);

    supervisor::run(cfg, metrics, checkpoints, objects, cancel).await
}

/// Interrupt or terminate triggers one cooperative shutdown; workers finish
/// their in-flight file before the supervisor returns.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = term.recv() => {}
                    }
                }
                Err(err) => {
                    error!(error = %err, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        info!("shutting down");
        cancel.cancel();
    });
}
