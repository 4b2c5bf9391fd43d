//! Client side of chunked uploads: planning, scheduling, retry and resume.

mod api;
mod checksum;
#[cfg(test)]
mod mock;
mod progress;
mod retry;
mod scheduler;
mod splitter;
mod state;
mod uploader;

pub use api::{ApiError, UploadApi};
pub use checksum::{calculate_file_checksum, checksum_bytes, file_checksum};
pub use progress::SpeedCalculator;
pub use retry::RetryPolicy;
pub use scheduler::{ChunkScheduler, DEFAULT_CONCURRENCY, SchedulerConfig};
pub use splitter::{
    BoxFuture, ChunkIter, ChunkRange, ChunkSource, FileSource, MemorySource, read_chunk, split,
};
pub use state::{ChunkStatus, TransferSnapshot};
pub use uploader::{UploadJob, Uploader};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("chunks failed: {indices:?}")]
    ChunksFailed { indices: Vec<u32> },

    #[error("transfer cancelled")]
    Cancelled,

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(u64),

    #[error("chunk plan mismatch: server expects {expected} chunks, local plan has {got}")]
    PlanMismatch { expected: u32, got: u32 },

    #[error("source is empty")]
    EmptySource,

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

impl TransferError {
    /// Whether retrying the failed attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api(e) => e.is_retryable(),
            _ => false,
        }
    }
}
