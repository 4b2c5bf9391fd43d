//! Upload service error types.

use chunkup_protocol::constants::{
    ERR_CHECKSUM_MISMATCH, ERR_COLLABORATOR, ERR_CONFLICT, ERR_INCOMPLETE_UPLOAD,
    ERR_INDEX_OUT_OF_RANGE, ERR_INVALID_ARGUMENT, ERR_NOT_FOUND, ERR_STORAGE_IO,
};

/// Errors produced by the chunk store, session registry and reassembler.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("chunk index {index} out of range (total chunks {total})")]
    IndexOutOfRange { index: u32, total: u32 },

    #[error("upload incomplete, missing chunks {missing:?}")]
    IncompleteUpload { missing: Vec<u32> },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("storage I/O error: {0}")]
    StorageIo(#[from] std::io::Error),

    #[error("session metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("{hook} hook failed: {message}")]
    Collaborator { hook: String, message: String },
}

impl UploadError {
    /// Stable wire error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) => ERR_INVALID_ARGUMENT,
            Self::NotFound(_) => ERR_NOT_FOUND,
            Self::Conflict(_) => ERR_CONFLICT,
            Self::IndexOutOfRange { .. } => ERR_INDEX_OUT_OF_RANGE,
            Self::IncompleteUpload { .. } => ERR_INCOMPLETE_UPLOAD,
            Self::ChecksumMismatch { .. } => ERR_CHECKSUM_MISMATCH,
            Self::StorageIo(_) | Self::Metadata(_) => ERR_STORAGE_IO,
            Self::Collaborator { .. } => ERR_COLLABORATOR,
        }
    }

    /// Whether retrying the same request unchanged may succeed.
    pub fn is_retryable(&self) -> bool {
        chunkup_protocol::constants::is_retryable_code(self.code())
    }

    pub(crate) fn session_not_found(upload_id: &str) -> Self {
        Self::NotFound(format!("upload session {upload_id}"))
    }
}
