pub mod binary;
pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use binary::{ChunkFrame, ParseError, encode_chunk_frame, parse_chunk_frame};
pub use constants::MessageType;
pub use envelope::{ErrorBody, Message};
pub use messages::{
    CollaboratorFailure, CompleteUploadRequest, CompleteUploadResponse, FileMetadata, HookOutcome,
    HookReport, InitUploadRequest, InitUploadResponse, UploadChunkHeader, UploadChunkResponse,
    UploadStatusRequest, UploadStatusResponse,
};
pub use types::FileType;
