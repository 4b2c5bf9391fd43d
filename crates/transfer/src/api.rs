//! Upload API trait the scheduler talks to.
//!
//! Implemented over WebSocket by `chunkup-ws-client` and in-process by its
//! `LocalUploadClient`. Using a trait keeps scheduling logic decoupled from
//! transport and testable with mocks.

use chunkup_protocol::constants::is_retryable_code;
use chunkup_protocol::messages::{
    CompleteUploadResponse, InitUploadRequest, InitUploadResponse, UploadChunkResponse,
    UploadStatusResponse,
};

use crate::splitter::BoxFuture;

/// Errors from an [`UploadApi`] call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    /// The server answered with an error envelope.
    #[error("server error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    /// The response could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ApiError {
    /// Whether the same request may succeed if sent again.
    ///
    /// Timeouts and transport failures are retryable; remote errors only
    /// when the server classifies them so.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote { code, .. } => is_retryable_code(*code),
            Self::Timeout | Self::Transport(_) => true,
            Self::Protocol(_) => false,
        }
    }
}

/// The four upload operations.
pub trait UploadApi: Send + Sync {
    fn init_upload(
        &self,
        req: InitUploadRequest,
    ) -> BoxFuture<'_, Result<InitUploadResponse, ApiError>>;

    /// Sends one chunk. Idempotent per `(upload_id, chunk_index)`.
    fn upload_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        chunk_index: u32,
        total_chunks: u32,
        data: &'a [u8],
    ) -> BoxFuture<'a, Result<UploadChunkResponse, ApiError>>;

    fn upload_status<'a>(
        &'a self,
        upload_id: &'a str,
    ) -> BoxFuture<'a, Result<UploadStatusResponse, ApiError>>;

    fn complete_upload<'a>(
        &'a self,
        upload_id: &'a str,
    ) -> BoxFuture<'a, Result<CompleteUploadResponse, ApiError>>;
}
