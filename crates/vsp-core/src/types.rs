use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// TTL applied to `file_hash:*` keys on write and to the status key once a
/// stream completes. Chunk bits and progress carry no expiry of their own;
/// operators rely on the status TTL to age out finished streams.
pub const CHECKPOINT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// One fixed-size slice of a file, produced in ascending index order.
///
/// `checksum` is the full SHA-256 of `data`, hex-encoded. The final chunk of a
/// file may be shorter than the configured chunk size but is never empty.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: u64,
    pub data: Vec<u8>,
    pub checksum: String,
    pub timestamp: DateTime<Utc>,
}

/// Persisted summary of an uploaded chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub index: u64,
    pub checksum: String,
    pub timestamp: DateTime<Utc>,
}

/// JSON descriptor uploaded next to the chunks once a stream finishes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub total_size: i64,
    pub chunks: Vec<ChunkMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_estimate: Option<f64>,
}

/// The stream identifier for a path is its base name.
pub fn stream_id_for(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn stream_id_is_base_name() {
        assert_eq!(stream_id_for(&PathBuf::from("/watch/in/v.mp4")), "v.mp4");
        assert_eq!(stream_id_for(&PathBuf::from("v.mkv")), "v.mkv");
    }

    #[test]
    fn metadata_serializes_expected_fields() {
        let meta = StreamMetadata {
            total_size: 16,
            chunks: vec![ChunkMeta {
                index: 0,
                checksum: "ab".into(),
                timestamp: Utc::now(),
            }],
            duration_estimate: None,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["total_size"], 16);
        assert_eq!(json["chunks"][0]["index"], 0);
        // Optional field is omitted entirely when unset.
        assert!(json.get("duration_estimate").is_none());
    }

    #[test]
    fn metadata_round_trips_duration_estimate() {
        let meta = StreamMetadata {
            total_size: 1,
            chunks: Vec::new(),
            duration_estimate: Some(12.5),
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"duration_estimate\":12.5"));
    }
}
