use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration for the processor.
///
/// The daemon populates this from environment variables (see the `vspd`
/// argument definitions); library code and tests construct it directly.
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_addr: String,
    pub redis_password: String,
    pub redis_db: i64,
    pub minio_endpoint: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    pub minio_bucket: String,
    pub minio_use_ssl: bool,
    pub watch_dir: PathBuf,
    pub chunk_size: usize,
    /// How long a file must stay free of filesystem events before it is
    /// considered stable and handed to a worker.
    pub stability_threshold: Duration,
    /// Per-operation deadline applied inside the store adapters.
    pub stream_timeout: Duration,
    pub prometheus_port: u16,
    pub log_level: String,
    pub worker_count: usize,
    /// Allowed extensions, lowercased, with leading dot (e.g. `.mp4`).
    pub video_file_formats: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_addr: "localhost:6379".to_string(),
            redis_password: String::new(),
            redis_db: 0,
            minio_endpoint: "localhost:9000".to_string(),
            minio_access_key: "minioadmin".to_string(),
            minio_secret_key: "minioadmin".to_string(),
            minio_bucket: "video-streams".to_string(),
            minio_use_ssl: false,
            watch_dir: PathBuf::from("./input_files"),
            chunk_size: 5 * 1024 * 1024,
            stability_threshold: Duration::from_secs(15),
            stream_timeout: Duration::from_secs(30),
            prometheus_port: 2112,
            log_level: "info".to_string(),
            worker_count: 4,
            video_file_formats: vec![".mp4".to_string(), ".mkv".to_string()],
        }
    }
}

impl Config {
    /// Worker pool size with the documented fallback for a zero value.
    pub fn effective_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            4
        } else {
            self.worker_count
        }
    }
}

/// Parses the comma-separated `VIDEO_FILE_FORMATS` value. Entries are trimmed
/// and lowercased; a leading dot is added when missing; empty entries are
/// dropped.
pub fn parse_video_formats(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(|f| {
            let f = f.to_lowercase();
            if f.starts_with('.') {
                f
            } else {
                format!(".{f}")
            }
        })
        .collect()
}

/// True when the path's extension (lowercased, with dot) is in the allowed
/// set. Paths without an extension never match.
pub fn is_allowed_extension(path: &Path, formats: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let ext = format!(".{}", ext.to_lowercase());
    formats.iter().any(|allowed| *allowed == ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_formats_adds_dot_and_lowercases() {
        assert_eq!(
            parse_video_formats("mp4, .MKV ,avi"),
            vec![".mp4", ".mkv", ".avi"]
        );
    }

    #[test]
    fn parse_formats_drops_empty_entries() {
        assert_eq!(parse_video_formats(".mp4,,  ,"), vec![".mp4"]);
        assert!(parse_video_formats("").is_empty());
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        let formats = parse_video_formats(".mp4,.mkv");
        assert!(is_allowed_extension(Path::new("/in/a.MP4"), &formats));
        assert!(is_allowed_extension(Path::new("b.mkv"), &formats));
        assert!(!is_allowed_extension(Path::new("c.avi"), &formats));
        assert!(!is_allowed_extension(Path::new("noext"), &formats));
    }

    #[test]
    fn worker_count_falls_back_when_zero() {
        let cfg = Config {
            worker_count: 0,
            ..Config::default()
        };
        assert_eq!(cfg.effective_worker_count(), 4);
        let cfg = Config {
            worker_count: 2,
            ..Config::default()
        };
        assert_eq!(cfg.effective_worker_count(), 2);
    }
}
