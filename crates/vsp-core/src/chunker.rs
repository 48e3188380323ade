use std::io::{self, Read};
use std::path::Path;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use crate::types::Chunk;

/// Chunks buffered between the blocking reader and the consumer. A slow
/// uploader exerts backpressure on the reader through this channel.
const CHUNK_CHANNEL_CAPACITY: usize = 4;

/// Opens `path` and streams fixed-size chunks in ascending index order.
///
/// The file is opened exactly once; an open failure is returned synchronously
/// and no chunks are produced. A read failure mid-stream ends the sequence
/// cleanly without surfacing an error to the consumer. The final chunk may be
/// shorter than `chunk_size` but is never empty.
///
/// Must be called from within a tokio runtime: reads run on a blocking task.
pub fn chunk_stream(path: &Path, chunk_size: usize) -> io::Result<mpsc::Receiver<Chunk>> {
    if chunk_size == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "chunk_size must be > 0",
        ));
    }
    let mut file = std::fs::File::open(path)?;
    let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);

    tokio::task::spawn_blocking(move || {
        let mut index: u64 = 0;
        loop {
            let mut buf = vec![0u8; chunk_size];
            let filled = match read_full(&mut file, &mut buf) {
                Ok(n) => n,
                // Mid-stream read errors truncate the sequence.
                Err(_) => break,
            };
            if filled == 0 {
                break;
            }
            buf.truncate(filled);

            let checksum = hex::encode(Sha256::digest(&buf));
            let chunk = Chunk {
                index,
                data: buf,
                checksum,
                timestamp: Utc::now(),
            };
            if tx.blocking_send(chunk).is_err() {
                // Consumer went away; stop reading.
                break;
            }
            if filled < chunk_size {
                break;
            }
            index += 1;
        }
    });

    Ok(rx)
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    async fn collect(path: &Path, chunk_size: usize) -> Vec<Chunk> {
        let mut rx = chunk_stream(path, chunk_size).unwrap();
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.push(chunk);
        }
        out
    }

    #[tokio::test]
    async fn splits_exact_multiple_into_full_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "v.mp4", &[7u8; 16]);

        let chunks = collect(&path, 4).await;
        assert_eq!(chunks.len(), 4);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i as u64);
            assert_eq!(chunk.data.len(), 4);
        }
    }

    #[tokio::test]
    async fn final_chunk_carries_the_remainder() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "v.mp4", b"0123456789");

        let chunks = collect(&path, 4).await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].data, b"0123");
        assert_eq!(chunks[1].data, b"4567");
        assert_eq!(chunks[2].data, b"89");
    }

    #[tokio::test]
    async fn checksum_is_sha256_of_chunk_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "v.mp4", b"abcdef");

        let chunks = collect(&path, 3).await;
        for chunk in &chunks {
            assert_eq!(chunk.checksum, hex::encode(Sha256::digest(&chunk.data)));
            assert_eq!(chunk.checksum.len(), 64);
        }
    }

    #[tokio::test]
    async fn empty_file_produces_no_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "v.mp4", b"");
        assert!(collect(&path, 4).await.is_empty());
    }

    #[tokio::test]
    async fn open_failure_is_synchronous() {
        let dir = tempfile::tempdir().unwrap();
        let err = chunk_stream(&dir.path().join("absent.mp4"), 4).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn zero_chunk_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "v.mp4", b"x");
        let err = chunk_stream(&path, 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
