//! Request-level façade over the store, registry and reassembler.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chunkup_protocol::constants::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use chunkup_protocol::messages::{
    CompleteUploadRequest, CompleteUploadResponse, InitUploadRequest, InitUploadResponse,
    UploadChunkResponse, UploadStatusRequest, UploadStatusResponse,
};
use tracing::debug;

use crate::error::UploadError;
use crate::hooks::Hooks;
use crate::reassembler::Reassembler;
use crate::registry::{EvictionReport, SessionRegistry};
use crate::store::{ChunkStore, FsChunkStore};

/// Default idle time after which a session is evicted: 24 hours.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Storage layout and limits for an [`UploadService`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Chunks go to `<data_dir>/uploads`, session metadata to `<data_dir>/sessions`.
    pub data_dir: PathBuf,
    /// Final artifacts.
    pub completed_dir: PathBuf,
    /// Chunk size handed to new sessions.
    pub chunk_size: u64,
    pub session_ttl: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            completed_dir: PathBuf::from("completed"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}

impl ServiceConfig {
    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }
}

/// The server side of a resumable upload.
pub struct UploadService {
    chunk_size: u64,
    store: Arc<dyn ChunkStore>,
    registry: Arc<SessionRegistry>,
    reassembler: Reassembler,
}

impl UploadService {
    /// Opens a filesystem-backed service, restoring persisted sessions.
    pub async fn open(config: ServiceConfig, hooks: Hooks) -> Result<Self, UploadError> {
        if config.chunk_size == 0 {
            return Err(UploadError::InvalidArgument(
                "chunk size must be greater than 0".into(),
            ));
        }
        if config.chunk_size > MAX_CHUNK_SIZE {
            return Err(UploadError::InvalidArgument(format!(
                "chunk size {} does not fit in a {MAX_CHUNK_SIZE}-byte chunk frame",
                config.chunk_size
            )));
        }
        let store: Arc<dyn ChunkStore> = Arc::new(FsChunkStore::open(config.uploads_dir()).await?);
        Self::with_store(store, config, hooks).await
    }

    /// Opens a service over an arbitrary chunk store.
    pub async fn with_store(
        store: Arc<dyn ChunkStore>,
        config: ServiceConfig,
        hooks: Hooks,
    ) -> Result<Self, UploadError> {
        let registry = Arc::new(
            SessionRegistry::open(store.clone(), config.sessions_dir(), config.session_ttl).await?,
        );
        let reassembler = Reassembler::new(
            registry.clone(),
            store.clone(),
            config.completed_dir,
            hooks,
        );
        Ok(Self {
            chunk_size: config.chunk_size,
            store,
            registry,
            reassembler,
        })
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub async fn init_upload(
        &self,
        req: InitUploadRequest,
    ) -> Result<InitUploadResponse, UploadError> {
        let session = self
            .registry
            .init(
                &req.filename,
                req.total_size,
                self.chunk_size,
                req.checksum.as_deref(),
            )
            .await?;
        Ok(InitUploadResponse {
            upload_id: session.id,
            chunk_size: session.chunk_size,
            total_chunks: session.total_chunks,
        })
    }

    /// Stores one chunk. Re-sending an already stored chunk succeeds.
    pub async fn upload_chunk(
        &self,
        upload_id: &str,
        chunk_index: u32,
        total_chunks: u32,
        data: &[u8],
    ) -> Result<UploadChunkResponse, UploadError> {
        self.registry
            .check_chunk(upload_id, chunk_index, total_chunks, data.len() as u64)?;
        let ack = self.store.store(upload_id, chunk_index, data).await?;
        self.registry
            .record_chunk_accepted(upload_id, chunk_index)
            .await?;

        let received = self.store.list(upload_id).await?.len() as u32;
        debug!(upload_id, chunk_index, ?ack, received, "chunk accepted");
        Ok(UploadChunkResponse {
            success: true,
            received_chunk_count: received,
        })
    }

    pub async fn upload_status(
        &self,
        req: UploadStatusRequest,
    ) -> Result<UploadStatusResponse, UploadError> {
        self.registry.status(&req.upload_id).await
    }

    pub async fn complete_upload(
        &self,
        req: CompleteUploadRequest,
    ) -> Result<CompleteUploadResponse, UploadError> {
        self.reassembler.complete(&req.upload_id).await
    }

    /// Runs one eviction sweep against the current time.
    pub async fn evict_expired(&self) -> Result<EvictionReport, UploadError> {
        self.registry.evict_expired(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogNotifier;
    use crate::hooks::{DatasetValidator, SkippedScanner};
    use tempfile::TempDir;

    async fn service(tmp: &TempDir, chunk_size: u64) -> UploadService {
        let config = ServiceConfig {
            data_dir: tmp.path().join("data"),
            completed_dir: tmp.path().join("completed"),
            chunk_size,
            session_ttl: DEFAULT_SESSION_TTL,
        };
        UploadService::open(config, Hooks::none()).await.unwrap()
    }

    fn init_req(filename: &str, total_size: u64) -> InitUploadRequest {
        InitUploadRequest {
            filename: filename.into(),
            total_size,
            checksum: None,
        }
    }

    #[tokio::test]
    async fn full_flow() {
        let tmp = TempDir::new().unwrap();
        let svc = service(&tmp, 4).await;
        let data = b"0123456789";

        let init = svc.init_upload(init_req("digits.txt", 10)).await.unwrap();
        assert_eq!(init.chunk_size, 4);
        assert_eq!(init.total_chunks, 3);

        for (i, chunk) in data.chunks(4).enumerate() {
            let resp = svc
                .upload_chunk(&init.upload_id, i as u32, 3, chunk)
                .await
                .unwrap();
            assert!(resp.success);
            assert_eq!(resp.received_chunk_count, i as u32 + 1);
        }

        let status = svc
            .upload_status(UploadStatusRequest {
                upload_id: init.upload_id.clone(),
            })
            .await
            .unwrap();
        assert!(status.is_complete);

        let done = svc
            .complete_upload(CompleteUploadRequest {
                upload_id: init.upload_id.clone(),
            })
            .await
            .unwrap();
        assert_eq!(std::fs::read(&done.artifact_path).unwrap(), data);
        assert_eq!(
            done.metadata.file_type,
            chunkup_protocol::types::FileType::Dataset
        );
    }

    #[tokio::test]
    async fn duplicate_chunk_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let svc = service(&tmp, 4).await;
        let init = svc.init_upload(init_req("a.bin", 8)).await.unwrap();

        let first = svc.upload_chunk(&init.upload_id, 1, 2, b"abcd").await.unwrap();
        let again = svc.upload_chunk(&init.upload_id, 1, 2, b"abcd").await.unwrap();
        assert_eq!(first, again);
        assert_eq!(again.received_chunk_count, 1);
    }

    #[tokio::test]
    async fn rejects_bad_chunks() {
        let tmp = TempDir::new().unwrap();
        let svc = service(&tmp, 4).await;
        let init = svc.init_upload(init_req("a.bin", 8)).await.unwrap();

        let err = svc
            .upload_chunk(&init.upload_id, 2, 2, b"abcd")
            .await
            .unwrap_err();
        assert_eq!(err.code(), 416);
        let err = svc
            .upload_chunk(&init.upload_id, 0, 2, b"abc")
            .await
            .unwrap_err();
        assert_eq!(err.code(), 400);
        let err = svc.upload_chunk("nope", 0, 2, b"abcd").await.unwrap_err();
        assert_eq!(err.code(), 404);
    }

    #[tokio::test]
    async fn chunks_after_completion_conflict() {
        let tmp = TempDir::new().unwrap();
        let svc = service(&tmp, 4).await;
        let init = svc.init_upload(init_req("a.bin", 4)).await.unwrap();
        svc.upload_chunk(&init.upload_id, 0, 1, b"abcd").await.unwrap();
        svc.complete_upload(CompleteUploadRequest {
            upload_id: init.upload_id.clone(),
        })
        .await
        .unwrap();

        let err = svc
            .upload_chunk(&init.upload_id, 0, 1, b"abcd")
            .await
            .unwrap_err();
        assert_eq!(err.code(), 409);
    }

    #[tokio::test]
    async fn disjoint_concurrent_uploads() {
        let tmp = TempDir::new().unwrap();
        let svc = Arc::new(service(&tmp, 16).await);
        let init = svc.init_upload(init_req("c.bin", 16 * 40)).await.unwrap();

        let mut handles = Vec::new();
        for worker in 0..4u32 {
            let svc = svc.clone();
            let id = init.upload_id.clone();
            handles.push(tokio::spawn(async move {
                for index in (worker..40).step_by(4) {
                    svc.upload_chunk(&id, index, 40, &[index as u8; 16])
                        .await
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let status = svc
            .upload_status(UploadStatusRequest {
                upload_id: init.upload_id.clone(),
            })
            .await
            .unwrap();
        assert_eq!(status.received_chunks, (0..40).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn standard_hooks_run_on_completion() {
        let tmp = TempDir::new().unwrap();
        let catalog = Arc::new(
            CatalogNotifier::open(tmp.path().join("metadata_store.json"))
                .await
                .unwrap(),
        );
        let hooks = Hooks::none()
            .with_validator(Arc::new(DatasetValidator))
            .with_scanner(Arc::new(SkippedScanner))
            .with_notifier(catalog.clone());
        let config = ServiceConfig {
            data_dir: tmp.path().join("data"),
            completed_dir: tmp.path().join("completed"),
            chunk_size: 1024,
            session_ttl: DEFAULT_SESSION_TTL,
        };
        let svc = UploadService::open(config, hooks).await.unwrap();

        let body = b"{\"prompt\":\"hi\"}\n{\"prompt\":\"yo\"}\n";
        let init = svc
            .init_upload(init_req("train.jsonl", body.len() as u64))
            .await
            .unwrap();
        svc.upload_chunk(&init.upload_id, 0, 1, body).await.unwrap();
        let done = svc
            .complete_upload(CompleteUploadRequest {
                upload_id: init.upload_id.clone(),
            })
            .await
            .unwrap();

        assert!(done.hooks.validation.unwrap().passed);
        assert!(done.hooks.scan.unwrap().passed);
        assert!(done.hooks.collaborator_errors.is_empty());
        let lineage = catalog.lineage(&init.upload_id).await.unwrap().unwrap();
        assert_eq!(lineage.upload_timestamp, done.metadata.timestamp);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn duplicate_chunk_racing_completion_keeps_result_across_restart() {
        let tmp = TempDir::new().unwrap();
        let mut ids = Vec::new();
        {
            let svc = Arc::new(service(&tmp, 4).await);
            for round in 0..50 {
                let init = svc
                    .init_upload(init_req(&format!("r{round}.bin"), 8))
                    .await
                    .unwrap();
                let id = init.upload_id.clone();
                svc.upload_chunk(&id, 0, 2, b"abcd").await.unwrap();
                svc.upload_chunk(&id, 1, 2, b"efgh").await.unwrap();

                let dup = {
                    let svc = svc.clone();
                    let id = id.clone();
                    // Either accepted or rejected as already complete.
                    tokio::spawn(async move { svc.upload_chunk(&id, 0, 2, b"abcd").await })
                };
                let done = svc
                    .complete_upload(CompleteUploadRequest {
                        upload_id: id.clone(),
                    })
                    .await
                    .unwrap();
                let _ = dup.await.unwrap();
                ids.push((id, done));
            }
        }

        let svc = service(&tmp, 4).await;
        for (id, done) in ids {
            let again = svc
                .complete_upload(CompleteUploadRequest { upload_id: id })
                .await
                .unwrap();
            assert_eq!(again, done);
        }
    }

    #[tokio::test]
    async fn rejects_zero_chunk_size() {
        let tmp = TempDir::new().unwrap();
        let config = ServiceConfig {
            data_dir: tmp.path().join("data"),
            chunk_size: 0,
            ..ServiceConfig::default()
        };
        assert!(UploadService::open(config, Hooks::none()).await.is_err());
    }

    #[tokio::test]
    async fn rejects_chunk_size_larger_than_a_frame() {
        let tmp = TempDir::new().unwrap();
        let config = ServiceConfig {
            data_dir: tmp.path().join("data"),
            chunk_size: MAX_CHUNK_SIZE + 1,
            ..ServiceConfig::default()
        };
        assert!(matches!(
            UploadService::open(config, Hooks::none()).await,
            Err(UploadError::InvalidArgument(_))
        ));
    }
}
