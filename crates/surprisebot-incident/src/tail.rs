//! Read-only file tailing (§4.8 step 1): tracks `(size, mtime)` per
//! watched file and reads only the bytes appended since the last
//! observation, capped at [`MAX_READ_BYTES`]. A file that shrank
//! (rotated or truncated) resets the cursor to 0 instead of resuming
//! from a now-invalid offset.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Caps a single tail read so one enormous log write can't block the
/// incident pipeline or blow past ledger record size expectations.
pub const MAX_READ_BYTES: u64 = 256 * 1024;

#[derive(Debug, Clone, Copy, Default)]
struct Observation {
    size: u64,
}

#[derive(Default)]
pub struct TailState {
    observed: HashMap<PathBuf, Observation>,
}

impl TailState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the bytes appended to `path` since the last observation. A
    /// first-ever observation reads from the start of the file (so a
    /// freshly-discovered file is processed in full). Returns `None` if
    /// the file hasn't grown, is empty, or can't be read.
    pub async fn read_new_bytes(&mut self, path: &Path) -> Option<Vec<u8>> {
        let metadata = fs::metadata(path).await.ok()?;
        let size = metadata.len();
        let previous = self.observed.get(path).copied();
        let start = match previous {
            Some(prev) if size >= prev.size => prev.size,
            // shrank (or first time we've heard of a size > 0 this run
            // via a rotated file) — reset to the beginning.
            _ => 0,
        };

        self.observed.insert(path.to_path_buf(), Observation { size });

        if size == 0 || size == start {
            return None;
        }

        let mut file = fs::File::open(path).await.ok()?;
        file.seek(std::io::SeekFrom::Start(start)).await.ok()?;
        let to_read = (size - start).min(MAX_READ_BYTES);
        let mut buf = vec![0u8; to_read as usize];
        file.read_exact(&mut buf).await.ok()?;
        Some(buf)
    }

    pub fn forget(&mut self, path: &Path) {
        self.observed.remove(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn write_file(path: &Path, content: &[u8]) {
        let mut f = fs::File::create(path).await.unwrap();
        f.write_all(content).await.unwrap();
        f.flush().await.unwrap();
    }

    #[tokio::test]
    async fn first_observation_reads_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        write_file(&path, b"hello").await;

        let mut tail = TailState::new();
        let bytes = tail.read_new_bytes(&path).await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn second_call_reads_only_appended_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        write_file(&path, b"hello").await;

        let mut tail = TailState::new();
        tail.read_new_bytes(&path).await.unwrap();

        let mut f = tokio::fs::OpenOptions::new().append(true).open(&path).await.unwrap();
        f.write_all(b" world").await.unwrap();
        f.flush().await.unwrap();

        let bytes = tail.read_new_bytes(&path).await.unwrap();
        assert_eq!(bytes, b" world");
    }

    #[tokio::test]
    async fn unchanged_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        write_file(&path, b"hello").await;

        let mut tail = TailState::new();
        tail.read_new_bytes(&path).await.unwrap();
        assert!(tail.read_new_bytes(&path).await.is_none());
    }

    #[tokio::test]
    async fn shrunk_file_resets_cursor_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        write_file(&path, b"0123456789").await;

        let mut tail = TailState::new();
        tail.read_new_bytes(&path).await.unwrap();

        write_file(&path, b"new").await;
        let bytes = tail.read_new_bytes(&path).await.unwrap();
        assert_eq!(bytes, b"new");
    }

    #[tokio::test]
    async fn empty_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        write_file(&path, b"").await;

        let mut tail = TailState::new();
        assert!(tail.read_new_bytes(&path).await.is_none());
    }
}
