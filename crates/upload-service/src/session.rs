use chrono::{DateTime, Utc};
use chunkup_protocol::messages::CompleteUploadResponse;
use serde::{Deserialize, Serialize};

use crate::error::UploadError;

/// Persisted state of one upload session.
///
/// `total_chunks` is fixed when the session is created. Which chunks have
/// been received is never stored here; it is always read from the
/// [`ChunkStore`](crate::ChunkStore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub id: String,
    pub filename: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Last accepted chunk or completion; drives eviction.
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Cached completion result, set once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CompleteUploadResponse>,
}

impl UploadSession {
    pub fn is_completed(&self) -> bool {
        self.result.is_some()
    }

    /// Exact byte length the chunk at `index` must have.
    ///
    /// Every chunk is `chunk_size` long except the last, which holds the
    /// remainder.
    pub fn expected_chunk_len(&self, index: u32) -> u64 {
        if index + 1 == self.total_chunks {
            self.total_size - u64::from(index) * self.chunk_size
        } else {
            self.chunk_size
        }
    }

    /// Most recent activity timestamp.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.completed_at.unwrap_or(self.updated_at)
    }
}

/// Number of chunks needed for `total_size` bytes: `ceil(total_size / chunk_size)`.
pub fn chunk_count(total_size: u64, chunk_size: u64) -> Result<u32, UploadError> {
    if total_size == 0 {
        return Err(UploadError::InvalidArgument(
            "totalSize must be greater than 0".into(),
        ));
    }
    if chunk_size == 0 {
        return Err(UploadError::InvalidArgument(
            "chunkSize must be greater than 0".into(),
        ));
    }
    u32::try_from(total_size.div_ceil(chunk_size)).map_err(|_| {
        UploadError::InvalidArgument(format!(
            "{total_size} bytes needs more than {} chunks of {chunk_size} bytes",
            u32::MAX
        ))
    })
}
