//! In-process [`UploadApi`] over an [`UploadService`], for embedding the
//! server next to the client and for tests.

use std::sync::Arc;

use chunkup_protocol::messages::{
    CompleteUploadRequest, CompleteUploadResponse, InitUploadRequest, InitUploadResponse,
    UploadChunkResponse, UploadStatusRequest, UploadStatusResponse,
};
use chunkup_transfer::{ApiError, BoxFuture, UploadApi};
use chunkup_upload_service::{UploadError, UploadService};

/// Calls the service directly; errors keep their wire codes so the client
/// classifies them exactly as it would over the network.
#[derive(Clone)]
pub struct LocalUploadClient {
    service: Arc<UploadService>,
}

impl LocalUploadClient {
    pub fn new(service: Arc<UploadService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<UploadService> {
        &self.service
    }
}

fn remote(e: UploadError) -> ApiError {
    ApiError::Remote {
        code: e.code(),
        message: e.to_string(),
    }
}

impl UploadApi for LocalUploadClient {
    fn init_upload(
        &self,
        req: InitUploadRequest,
    ) -> BoxFuture<'_, Result<InitUploadResponse, ApiError>> {
        Box::pin(async move { self.service.init_upload(req).await.map_err(remote) })
    }

    fn upload_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        chunk_index: u32,
        total_chunks: u32,
        data: &'a [u8],
    ) -> BoxFuture<'a, Result<UploadChunkResponse, ApiError>> {
        Box::pin(async move {
            self.service
                .upload_chunk(upload_id, chunk_index, total_chunks, data)
                .await
                .map_err(remote)
        })
    }

    fn upload_status<'a>(
        &'a self,
        upload_id: &'a str,
    ) -> BoxFuture<'a, Result<UploadStatusResponse, ApiError>> {
        Box::pin(async move {
            let req = UploadStatusRequest {
                upload_id: upload_id.to_string(),
            };
            self.service.upload_status(req).await.map_err(remote)
        })
    }

    fn complete_upload<'a>(
        &'a self,
        upload_id: &'a str,
    ) -> BoxFuture<'a, Result<CompleteUploadResponse, ApiError>> {
        Box::pin(async move {
            let req = CompleteUploadRequest {
                upload_id: upload_id.to_string(),
            };
            self.service.complete_upload(req).await.map_err(remote)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkup_transfer::{SchedulerConfig, Uploader, checksum_bytes};
    use chunkup_upload_service::{Hooks, ServiceConfig};
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    async fn client(tmp: &TempDir, chunk_size: u64) -> LocalUploadClient {
        let config = ServiceConfig {
            data_dir: tmp.path().join("data"),
            completed_dir: tmp.path().join("completed"),
            chunk_size,
            ..ServiceConfig::default()
        };
        let service = UploadService::open(config, Hooks::none()).await.unwrap();
        LocalUploadClient::new(Arc::new(service))
    }

    #[tokio::test]
    async fn errors_keep_wire_codes() {
        let tmp = TempDir::new().unwrap();
        let c = client(&tmp, 4).await;

        let err = c.upload_status("missing").await.unwrap_err();
        assert!(matches!(err, ApiError::Remote { code: 404, .. }));
        assert!(!err.is_retryable());

        let init = c
            .init_upload(InitUploadRequest {
                filename: "a.bin".into(),
                total_size: 8,
                checksum: None,
            })
            .await
            .unwrap();
        let err = c
            .upload_chunk(&init.upload_id, 5, init.total_chunks, b"abcd")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Remote { code: 416, .. }));
    }

    #[tokio::test]
    async fn uploader_runs_in_process() {
        let tmp = TempDir::new().unwrap();
        let c = client(&tmp, 16).await;
        let bytes: Vec<u8> = (0..100u8).collect();
        let path = tmp.path().join("weights.safetensors");
        std::fs::write(&path, &bytes).unwrap();

        let uploader = Uploader::new(Arc::new(c.clone()), SchedulerConfig::default());
        let resp = uploader
            .upload(&path, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resp.metadata.size, 100);
        assert_eq!(resp.metadata.checksum, checksum_bytes(&bytes));
        assert_eq!(std::fs::read(&resp.artifact_path).unwrap(), bytes);
    }
}
