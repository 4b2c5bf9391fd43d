use serde::{Deserialize, Serialize};

use crate::types::FileType;

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Starts a new upload session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    pub filename: String,
    pub total_size: u64,
    /// Optional SHA-256 (hex) of the whole file, verified after reassembly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Header of a binary chunk frame. The payload follows the header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkHeader {
    /// Request id, echoed in the response envelope.
    pub id: String,
    pub upload_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
}

/// Queries which chunks the server holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusRequest {
    pub upload_id: String,
}

/// Asks the server to reassemble a fully received upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub upload_id: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    pub upload_id: String,
    pub chunk_size: u64,
    pub total_chunks: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkResponse {
    pub success: bool,
    pub received_chunk_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusResponse {
    pub upload_id: String,
    /// Chunk size fixed at init, so a client can re-plan on resume.
    pub chunk_size: u64,
    pub total_chunks: u32,
    /// Sorted ascending.
    pub received_chunks: Vec<u32>,
    pub is_complete: bool,
}

/// Metadata describing a reassembled artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub upload_id: String,
    /// Final on-disk file name, which may differ from the requested one on
    /// collision.
    pub filename: String,
    pub size: u64,
    /// SHA-256 of the artifact, lowercase hex.
    pub checksum: String,
    pub file_type: FileType,
    /// RFC 3339 completion time.
    pub timestamp: String,
}

/// Result of one advisory completion hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutcome {
    pub passed: bool,
    /// Failure reason, or `skipped` style status for hooks that did not run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<String>,
}

impl HookOutcome {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
            findings: Vec::new(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
            findings: Vec::new(),
        }
    }
}

/// A completion collaborator that errored out rather than returning a verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorFailure {
    /// `validation`, `scan` or `notification`.
    pub hook: String,
    pub code: i32,
    pub message: String,
}

/// Outcome of the completion hooks. Never affects the stored artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<HookOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan: Option<HookOutcome>,
    #[serde(default)]
    pub collaborator_errors: Vec<CollaboratorFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadResponse {
    pub success: bool,
    pub artifact_path: String,
    pub metadata: FileMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downstream_job_id: Option<String>,
    #[serde(default)]
    pub hooks: HookReport,
}
