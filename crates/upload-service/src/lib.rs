//! Server side of chunkup resumable uploads.
//!
//! This crate implements the **durable state machine** behind an upload.
//! It has no transport dependencies; `chunkup-ws-server` exposes it over
//! WebSocket and tests drive it directly.
//!
//! # Pipeline
//!
//! 1. **Init**: register a session and fix its chunk count
//! 2. **Store**: persist each chunk atomically and idempotently
//! 3. **Status**: report received chunks, read back from storage
//! 4. **Complete**: reassemble in order, verify, run hooks, clean up

mod atomic;
pub mod catalog;
pub mod error;
pub mod hooks;
pub mod reassembler;
pub mod registry;
pub mod service;
pub mod session;
pub mod store;
mod validation;

// Re-export primary types for convenience.
pub use catalog::{CatalogNotifier, CatalogRecord, Lineage};
pub use error::UploadError;
pub use hooks::{
    ArtifactInfo, ArtifactValidator, DatasetValidator, Hooks, PipelineNotifier, SecurityScanner,
    SkippedScanner,
};
pub use reassembler::Reassembler;
pub use registry::{EvictionReport, SessionRegistry};
pub use service::{DEFAULT_SESSION_TTL, ServiceConfig, UploadService};
pub use session::{UploadSession, chunk_count};
pub use store::{Ack, BoxFuture, ChunkStore, FsChunkStore};
pub use validation::validate_file_name;
