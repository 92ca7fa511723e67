//! Chunked, resumable file transfers.
//!
//! Each stream writes into scoped temporary storage owned exclusively
//! by the manager. Chunks may arrive out of order, overlap, or repeat;
//! the byte-range coverage map merges them so completion is judged on
//! distinct bytes received, and the last write to an offset wins at
//! the storage layer. Completion atomically relocates the temp file to
//! its destination and returns a receipt with a blake3 digest.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::error::RemoraError;

// ── Storage collaborators ────────────────────────────────────────

/// One piece of scoped temporary storage, random-access writable.
#[async_trait]
pub trait TempFile: Send {
    /// Write `data` at `offset`.
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> std::io::Result<()>;

    /// Flush and atomically relocate to `dest`, overwriting if present.
    /// The temp file is consumed either way.
    async fn persist(&mut self, dest: &Path) -> std::io::Result<()>;

    /// Delete the temporary storage.
    async fn discard(&mut self);

    /// Location of the temporary storage (for integrity hashing).
    fn path(&self) -> &Path;
}

/// Factory for scoped temporary storage.
#[async_trait]
pub trait StreamStorage: Send {
    /// Create temp storage pre-sized for `total_size` bytes.
    async fn create(
        &mut self,
        name_hint: &str,
        total_size: u64,
    ) -> std::io::Result<Box<dyn TempFile>>;
}

// ── Filesystem-backed storage ────────────────────────────────────

/// [`TempFile`] over a real file.
pub struct FsTempFile {
    file: Option<tokio::fs::File>,
    path: PathBuf,
}

#[async_trait]
impl TempFile for FsTempFile {
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| std::io::Error::other("temp file already consumed"))?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await
    }

    async fn persist(&mut self, dest: &Path) -> std::io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.sync_all().await?;
        }
        // Close before rename; Windows refuses to move an open file.
        match tokio::fs::rename(&self.path, dest).await {
            Ok(()) => Ok(()),
            Err(_) => {
                // Cross-device or destination-exists fallback.
                let _ = tokio::fs::remove_file(dest).await;
                match tokio::fs::rename(&self.path, dest).await {
                    Ok(()) => Ok(()),
                    Err(_) => {
                        tokio::fs::copy(&self.path, dest).await?;
                        tokio::fs::remove_file(&self.path).await
                    }
                }
            }
        }
    }

    async fn discard(&mut self) {
        self.file.take();
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "temp file delete failed");
            }
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// [`StreamStorage`] rooted at a scoped directory.
pub struct FsStreamStorage {
    dir: PathBuf,
    seq: u64,
}

impl FsStreamStorage {
    /// Storage rooted at `dir` (created on first use).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: 0,
        }
    }

    /// Storage under the OS temp directory.
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir().join("remora-streams"))
    }
}

#[async_trait]
impl StreamStorage for FsStreamStorage {
    async fn create(
        &mut self,
        name_hint: &str,
        total_size: u64,
    ) -> std::io::Result<Box<dyn TempFile>> {
        tokio::fs::create_dir_all(&self.dir).await?;
        self.seq += 1;
        let hint: String = name_hint
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '-' || *c == '_')
            .take(64)
            .collect();
        let path = self
            .dir
            .join(format!("stream_{}_{}_{hint}.part", std::process::id(), self.seq));
        let file = tokio::fs::OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)
            .await?;
        file.set_len(total_size).await?;
        Ok(Box::new(FsTempFile {
            file: Some(file),
            path,
        }))
    }
}

// ── Coverage accounting ──────────────────────────────────────────

/// Merged half-open byte ranges; tracks distinct bytes received.
#[derive(Debug, Default)]
struct CoverageMap {
    /// Sorted, non-overlapping `[start, end)` ranges.
    ranges: Vec<(u64, u64)>,
}

impl CoverageMap {
    /// Record `[start, end)` as received, merging with neighbours.
    fn insert(&mut self, start: u64, end: u64) {
        if start >= end {
            return;
        }
        self.ranges.push((start, end));
        self.ranges.sort_unstable();
        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(self.ranges.len());
        for &(s, e) in &self.ranges {
            match merged.last_mut() {
                Some((_, last_end)) if s <= *last_end => *last_end = (*last_end).max(e),
                _ => merged.push((s, e)),
            }
        }
        self.ranges = merged;
    }

    /// Total distinct bytes covered.
    fn covered(&self) -> u64 {
        self.ranges.iter().map(|(s, e)| e - s).sum()
    }
}

// ── Transfer state ───────────────────────────────────────────────

/// Lifecycle of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Receiving,
    Completing,
    Completed,
    Failed,
    Aborted,
}

/// Result of a successful completion.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    /// Final destination of the file.
    pub destination: PathBuf,
    /// Bytes written (equals the declared total).
    pub bytes: u64,
    /// blake3 digest of the finished file.
    pub blake3: [u8; 32],
}

struct ActiveTransfer {
    name: String,
    total_size: u64,
    coverage: CoverageMap,
    state: TransferState,
    file: Box<dyn TempFile>,
}

// ── FileStreamManager ────────────────────────────────────────────

/// Manages concurrent chunked, resumable file transfers.
///
/// Temporary storage is exclusively owned here for each transfer's
/// lifetime and released on every terminal state.
pub struct FileStreamManager {
    storage: Box<dyn StreamStorage>,
    active: HashMap<u64, ActiveTransfer>,
    next_id: u64,
}

impl FileStreamManager {
    /// Create a manager over the given storage collaborator.
    pub fn new(storage: Box<dyn StreamStorage>) -> Self {
        Self {
            storage,
            active: HashMap::new(),
            next_id: 1,
        }
    }

    /// Open a new stream expecting `total_size` bytes; returns its id.
    pub async fn start_stream(&mut self, name: &str, total_size: u64) -> Result<u64, RemoraError> {
        let file = self.storage.create(name, total_size).await?;
        let id = self.next_id;
        self.next_id += 1;
        self.active.insert(
            id,
            ActiveTransfer {
                name: name.to_string(),
                total_size,
                coverage: CoverageMap::default(),
                state: TransferState::Receiving,
                file,
            },
        );
        info!(stream = id, name, total_size, "file stream started");
        Ok(id)
    }

    /// Write a chunk at `offset`. Out-of-order, overlapping, and
    /// duplicate ranges are fine; the last write to an offset wins.
    ///
    /// A storage error fails the transfer and releases its temp file
    /// immediately.
    pub async fn write_chunk(
        &mut self,
        id: u64,
        data: &[u8],
        offset: u64,
    ) -> Result<(), RemoraError> {
        let transfer = self
            .active
            .get_mut(&id)
            .ok_or(RemoraError::UnknownStream(id))?;

        if data.is_empty() {
            return Ok(());
        }

        let end = offset.checked_add(data.len() as u64);
        let result = match end {
            None => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("chunk at offset {offset} overflows the stream range"),
            )),
            Some(end) if end > transfer.total_size => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "chunk [{offset}, {end}) exceeds declared size {}",
                    transfer.total_size
                ),
            )),
            Some(_) => transfer.file.write_at(offset, data).await,
        };

        match result {
            Ok(()) => {
                // Single accounting step per write; `end` is present
                // whenever the write itself ran.
                if let Some(end) = end {
                    transfer.coverage.insert(offset, end);
                }
                Ok(())
            }
            Err(e) => {
                error!(stream = id, error = %e, "chunk write failed; transfer failed");
                if let Some(mut transfer) = self.active.remove(&id) {
                    transfer.state = TransferState::Failed;
                    transfer.file.discard().await;
                }
                Err(RemoraError::Io(e))
            }
        }
    }

    /// Finalize a stream into `destination`.
    ///
    /// Fails with [`RemoraError::IncompleteTransfer`] if distinct bytes
    /// received fall short of the declared total; the stream stays open
    /// so the caller may keep writing and retry.
    pub async fn complete_stream(
        &mut self,
        id: u64,
        destination: &Path,
    ) -> Result<TransferReceipt, RemoraError> {
        let transfer = self
            .active
            .get_mut(&id)
            .ok_or(RemoraError::UnknownStream(id))?;

        let received = transfer.coverage.covered();
        if received < transfer.total_size {
            return Err(RemoraError::IncompleteTransfer {
                received,
                expected: transfer.total_size,
            });
        }

        let Some(mut transfer) = self.active.remove(&id) else {
            return Err(RemoraError::UnknownStream(id));
        };
        transfer.state = TransferState::Completing;

        let digest = match hash_file(transfer.file.path()).await {
            Ok(digest) => digest,
            Err(e) => {
                transfer.state = TransferState::Failed;
                transfer.file.discard().await;
                return Err(RemoraError::Io(e));
            }
        };

        if let Err(e) = transfer.file.persist(destination).await {
            transfer.state = TransferState::Failed;
            transfer.file.discard().await;
            return Err(RemoraError::Io(e));
        }
        transfer.state = TransferState::Completed;
        info!(
            stream = id,
            name = %transfer.name,
            destination = %destination.display(),
            bytes = transfer.total_size,
            "file stream completed"
        );

        Ok(TransferReceipt {
            destination: destination.to_path_buf(),
            bytes: transfer.total_size,
            blake3: digest,
        })
    }

    /// Cancel a stream and delete its temporary storage.
    ///
    /// Idempotent: aborting an already-aborted or unknown id is a
    /// no-op, not an error.
    pub async fn abort_stream(&mut self, id: u64) {
        if let Some(mut transfer) = self.active.remove(&id) {
            transfer.state = TransferState::Aborted;
            transfer.file.discard().await;
            debug!(stream = id, "file stream aborted");
        }
    }

    /// Abort every open stream (session teardown path).
    pub async fn abort_all(&mut self) {
        let ids: Vec<u64> = self.active.keys().copied().collect();
        for id in ids {
            self.abort_stream(id).await;
        }
    }

    /// Number of open streams.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Distinct bytes received so far for a stream.
    pub fn bytes_received(&self, id: u64) -> Option<u64> {
        self.active.get(&id).map(|t| t.coverage.covered())
    }
}

/// Digest a file in fixed-size reads so completion never buffers the
/// whole payload in memory.
async fn hash_file(path: &Path) -> std::io::Result<[u8; 32]> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(*hasher.finalize().as_bytes())
}

// ── Tests ────────────────────────────────────────────────────────
