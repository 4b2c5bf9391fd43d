use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Read deadline: if nothing arrives within this window (no pong, no
/// request, no response) the connection is considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// Keepalive ping interval, used by both ends of a connection.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(15);

/// Maximum message size in bytes (64 MiB).
///
/// Bounds the largest chunk a client may send in one binary frame.
pub const WS_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Bytes of a binary frame set aside for the length prefix and JSON header.
pub const CHUNK_FRAME_HEADER_RESERVE: usize = 4 * 1024;

/// Largest chunk size whose frames still fit in [`WS_MAX_MESSAGE_SIZE`].
pub const MAX_CHUNK_SIZE: u64 = (WS_MAX_MESSAGE_SIZE - CHUNK_FRAME_HEADER_RESERVE) as u64;

/// Timeout for request/response operations (text messages).
///
/// `complete_upload` streams the whole artifact to disk before replying,
/// so this is generous.
pub const WS_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for a single binary chunk upload.
pub const WS_BINARY_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Default chunk size negotiated by the server: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// WebSocket message type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Requests from client to server
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "init_upload")]
    InitUpload,
    #[serde(rename = "upload_status")]
    UploadStatus,
    #[serde(rename = "complete_upload")]
    CompleteUpload,

    // Responses from server to client
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "init_upload_response")]
    InitUploadResponse,
    #[serde(rename = "upload_chunk_response")]
    UploadChunkResponse,
    #[serde(rename = "upload_status_response")]
    UploadStatusResponse,
    #[serde(rename = "complete_upload_response")]
    CompleteUploadResponse,
    #[serde(rename = "error")]
    Error,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

/// Bad init or chunk parameters.
pub const ERR_INVALID_ARGUMENT: i32 = 400;
/// Unknown session or chunk.
pub const ERR_NOT_FOUND: i32 = 404;
/// Chunk rewritten with a different length, or sent to a completed session.
pub const ERR_CONFLICT: i32 = 409;
/// Chunk index outside `[0, totalChunks)`.
pub const ERR_INDEX_OUT_OF_RANGE: i32 = 416;
/// `complete_upload` called while chunks are missing.
pub const ERR_INCOMPLETE_UPLOAD: i32 = 422;
/// Reassembled artifact does not match the checksum given at init.
pub const ERR_CHECKSUM_MISMATCH: i32 = 424;
/// Durable storage failure. Retryable.
pub const ERR_STORAGE_IO: i32 = 500;
/// Unknown message type.
pub const ERR_NOT_IMPLEMENTED: i32 = 501;
/// A completion collaborator failed. Never fatal to stored data.
pub const ERR_COLLABORATOR: i32 = 502;

/// Returns `true` if a request failing with `code` may succeed when retried
/// unchanged.
pub fn is_retryable_code(code: i32) -> bool {
    code == ERR_STORAGE_IO
}
