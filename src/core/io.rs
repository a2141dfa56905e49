//! File source/sink seams and their disk-backed implementations.
//!
//! The engine never touches the filesystem directly: uploads read through
//! [`FileSource`], downloads write through a [`FileSink`] obtained from a
//! [`SinkProvider`]. The disk implementations here stream with bounded
//! memory — one chunk in flight at a time — and commit downloads atomically
//! via a temp file renamed into place on close.

use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::warn;

// ── Traits ───────────────────────────────────────────────────────────────────

/// Read side of an upload. Reads are sequential in practice but addressed
/// by offset so the driver owns the cursor.
#[async_trait]
pub trait FileSource: Send {
    /// Read up to `len` bytes starting at `offset`. A short read only
    /// occurs at end of file; an empty result means nothing remains.
    async fn read_slice(&mut self, offset: u64, len: usize) -> Result<Bytes>;
}

/// Write side of a download.
///
/// Exactly one of `close` / `abort` terminates the sink: `close` after the
/// peer's `End`, `abort` on cancellation or write failure.
#[async_trait]
pub trait FileSink: Send {
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Finalize and persist the received data.
    async fn close(&mut self) -> Result<()>;

    /// Discard everything written so far. Infallible by contract — there
    /// is nothing useful the caller could do with an abort failure.
    async fn abort(&mut self);
}

/// Creates a sink for each inbound transfer announced by a `Header`.
#[async_trait]
pub trait SinkProvider: Send + Sync {
    async fn create(&self, name: &str, size: u64) -> Result<Box<dyn FileSink>>;
}

// ── Disk source ──────────────────────────────────────────────────────────────

/// Upload source backed by a file on disk.
pub struct DiskSource {
    file: fs::File,
}

impl DiskSource {
    /// Open `path` for reading and return the source plus the file size.
    pub async fn open(path: &Path) -> Result<(Self, u64)> {
        let file = fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok((Self { file }, size))
    }
}

#[async_trait]
impl FileSource for DiskSource {
    async fn read_slice(&mut self, offset: u64, len: usize) -> Result<Bytes> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        // read() may return short before EOF; fill until EOF or len.
        while filled < len {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(Bytes::from(buf))
    }
}

// ── Disk sink ────────────────────────────────────────────────────────────────

/// Download sink writing to `<path>.part`, renamed to `path` on close.
pub struct DiskSink {
    file: Option<fs::File>,
    temp_path: PathBuf,
    final_path: PathBuf,
}

impl DiskSink {
    pub async fn create(path: PathBuf, size: u64) -> Result<Self> {
        let temp_path = {
            let mut name = path.as_os_str().to_owned();
            name.push(".part");
            PathBuf::from(name)
        };
        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .await?;
        // Pre-size sparsely so the filesystem can reserve logical space.
        file.set_len(size).await?;
        Ok(Self {
            file: Some(file),
            temp_path,
            final_path: path,
        })
    }
}

#[async_trait]
impl FileSink for DiskSink {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| anyhow!("Sink already closed"))?;
        file.write_all(data).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| anyhow!("Sink already closed"))?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&self.temp_path, &self.final_path).await?;
        Ok(())
    }

    async fn abort(&mut self) {
        self.file.take();
        if let Err(e) = fs::remove_file(&self.temp_path).await {
            warn!(event = "sink_abort_cleanup_failed", path = %self.temp_path.display(), error = %e, "Could not remove temp file");
        }
    }
}

/// Sink provider rooted at a download directory.
pub struct DiskSinkProvider {
    dir: PathBuf,
}

impl DiskSinkProvider {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl SinkProvider for DiskSinkProvider {
    async fn create(&self, name: &str, size: u64) -> Result<Box<dyn FileSink>> {
        // The name comes from the peer: keep only a plain filename so a
        // malicious header cannot escape the download directory.
        let candidate = Path::new(name);
        let safe = match candidate.components().next_back() {
            Some(Component::Normal(n)) if candidate.components().count() == 1 => n,
            _ => return Err(anyhow!("Unsafe download filename: {:?}", name)),
        };
        let sink = DiskSink::create(self.dir.join(safe), size).await?;
        Ok(Box::new(sink))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("dropwire_test").join("io").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        let _ = std::fs::create_dir_all(&dir);
        dir
    }

    fn cleanup(path: &Path) {
        let _ = std::fs::remove_dir_all(path);
    }

    #[tokio::test]
    async fn source_reads_slices_with_short_tail() {
        let dir = test_dir("source_slices");
        let path = dir.join("src.bin");
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let (mut src, size) = DiskSource::open(&path).await.unwrap();
        assert_eq!(size, 1000);

        let a = src.read_slice(0, 600).await.unwrap();
        assert_eq!(&a[..], &data[..600]);
        let b = src.read_slice(600, 600).await.unwrap();
        assert_eq!(&b[..], &data[600..]);
        let c = src.read_slice(1000, 600).await.unwrap();
        assert!(c.is_empty());

        cleanup(&dir);
    }

    #[tokio::test]
    async fn sink_commits_atomically_on_close() {
        let dir = test_dir("sink_commit");
        let path = dir.join("out.bin");

        let mut sink = DiskSink::create(path.clone(), 6).await.unwrap();
        sink.write(b"abc").await.unwrap();
        assert!(!path.exists(), "final path must not appear before close");
        sink.write(b"def").await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
        assert!(!dir.join("out.bin.part").exists());
        cleanup(&dir);
    }

    #[tokio::test]
    async fn sink_abort_removes_temp_file() {
        let dir = test_dir("sink_abort");
        let path = dir.join("gone.bin");

        let mut sink = DiskSink::create(path.clone(), 100).await.unwrap();
        sink.write(b"partial").await.unwrap();
        sink.abort().await;

        assert!(!path.exists());
        assert!(!dir.join("gone.bin.part").exists());
        cleanup(&dir);
    }

    #[tokio::test]
    async fn provider_rejects_traversal_names() {
        let dir = test_dir("provider_traversal");
        let provider = DiskSinkProvider::new(dir.clone());

        assert!(provider.create("../evil.bin", 10).await.is_err());
        assert!(provider.create("/etc/passwd", 10).await.is_err());
        assert!(provider.create("nested/evil.bin", 10).await.is_err());
        assert!(provider.create("fine.bin", 10).await.is_ok());

        cleanup(&dir);
    }
}
