//! Splits a source of known length into ordered chunk ranges.

use std::future::Future;
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::TransferError;

/// One chunk of a source: bytes `[offset, offset + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: u32,
    pub offset: u64,
    pub len: u64,
}

impl ChunkRange {
    pub fn byte_range(&self) -> Range<u64> {
        self.offset..self.offset + self.len
    }
}

/// Ordered, restartable iterator over the chunks of a source.
///
/// A clone continues independently from the same position; call [`split`]
/// again for a fresh pass.
#[derive(Debug, Clone)]
pub struct ChunkIter {
    total_size: u64,
    chunk_size: u64,
    next: u32,
    count: u32,
}

impl Iterator for ChunkIter {
    type Item = ChunkRange;

    fn next(&mut self) -> Option<ChunkRange> {
        if self.next >= self.count {
            return None;
        }
        let index = self.next;
        self.next += 1;
        let offset = u64::from(index) * self.chunk_size;
        Some(ChunkRange {
            index,
            offset,
            len: self.chunk_size.min(self.total_size - offset),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.count - self.next) as usize;
        (left, Some(left))
    }
}

impl ExactSizeIterator for ChunkIter {}

/// Splits `total_size` bytes into `chunk_size` pieces.
///
/// The last chunk may be shorter. An empty source yields no chunks.
pub fn split(total_size: u64, chunk_size: u64) -> Result<ChunkIter, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidChunkSize(chunk_size));
    }
    let count = u32::try_from(total_size.div_ceil(chunk_size))
        .map_err(|_| TransferError::InvalidChunkSize(chunk_size))?;
    Ok(ChunkIter {
        total_size,
        chunk_size,
        next: 0,
        count,
    })
}

// ---------------------------------------------------------------------------
// Chunk sources
// ---------------------------------------------------------------------------

/// Boxed future used by the client-side traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Something chunk bytes can be read from, one range at a time.
pub trait ChunkSource: Send + Sync {
    fn read(&self, range: ChunkRange) -> BoxFuture<'_, Result<Vec<u8>, TransferError>>;
}

/// Reads chunks lazily from a file on disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChunkSource for FileSource {
    fn read(&self, range: ChunkRange) -> BoxFuture<'_, Result<Vec<u8>, TransferError>> {
        Box::pin(read_chunk(&self.path, range))
    }
}

/// In-memory source.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl ChunkSource for MemorySource {
    fn read(&self, range: ChunkRange) -> BoxFuture<'_, Result<Vec<u8>, TransferError>> {
        Box::pin(async move {
            let r = range.byte_range();
            let (start, end) = (r.start as usize, r.end as usize);
            self.data
                .get(start..end)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| {
                    TransferError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("chunk {} beyond end of source", range.index),
                    ))
                })
        })
    }
}

/// Reads exactly one chunk's bytes from `path`.
pub async fn read_chunk(path: &Path, range: ChunkRange) -> Result<Vec<u8>, TransferError> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(range.offset)).await?;
    let mut buf = vec![0u8; range.len as usize];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}
