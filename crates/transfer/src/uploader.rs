//! Client orchestration: init or resume a session, push its chunks, complete.

use std::path::Path;
use std::sync::Arc;

use chunkup_protocol::messages::{CompleteUploadResponse, InitUploadRequest};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::TransferError;
use crate::api::UploadApi;
use crate::checksum::file_checksum;
use crate::scheduler::{ChunkScheduler, SchedulerConfig};
use crate::splitter::{ChunkRange, FileSource, split};
use crate::state::TransferSnapshot;

/// Uploads files through an [`UploadApi`].
#[derive(Clone)]
pub struct Uploader {
    api: Arc<dyn UploadApi>,
    config: SchedulerConfig,
    send_checksum: bool,
}

impl Uploader {
    pub fn new(api: Arc<dyn UploadApi>, config: SchedulerConfig) -> Self {
        Self {
            api,
            config,
            send_checksum: true,
        }
    }

    /// Whether to hash the file up front so the server can verify it.
    pub fn with_checksum(mut self, enabled: bool) -> Self {
        self.send_checksum = enabled;
        self
    }

    /// Uploads `path` end to end.
    pub async fn upload(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<CompleteUploadResponse, TransferError> {
        self.start(path).await?.finish(cancel).await
    }

    /// Continues an interrupted upload of `path`, sending only what the
    /// server is missing.
    pub async fn resume(
        &self,
        path: &Path,
        upload_id: &str,
        cancel: &CancellationToken,
    ) -> Result<CompleteUploadResponse, TransferError> {
        self.attach(path, upload_id).await?.finish(cancel).await
    }

    /// Opens a new session for `path` without sending any chunk yet.
    pub async fn start(&self, path: &Path) -> Result<UploadJob, TransferError> {
        let filename = file_name(path)?;
        let total_size = tokio::fs::metadata(path).await?.len();
        if total_size == 0 {
            return Err(TransferError::EmptySource);
        }
        let checksum = if self.send_checksum {
            Some(file_checksum(path).await?)
        } else {
            None
        };

        let resp = self
            .api
            .init_upload(InitUploadRequest {
                filename: filename.clone(),
                total_size,
                checksum,
            })
            .await?;
        info!(
            upload_id = %resp.upload_id,
            filename = %filename,
            total_size,
            chunk_size = resp.chunk_size,
            total_chunks = resp.total_chunks,
            "Upload session opened"
        );

        let plan = plan(total_size, resp.chunk_size, resp.total_chunks)?;
        Ok(self.job(path, resp.upload_id, plan))
    }

    /// Rebuilds the job for an existing session from the server's status.
    pub async fn attach(&self, path: &Path, upload_id: &str) -> Result<UploadJob, TransferError> {
        let total_size = tokio::fs::metadata(path).await?.len();
        let status = self.api.upload_status(upload_id).await?;
        let plan = plan(total_size, status.chunk_size, status.total_chunks)?;

        let job = self.job(path, status.upload_id, plan);
        job.scheduler.reconcile_with_server(&status.received_chunks);
        info!(
            upload_id = %upload_id,
            received = status.received_chunks.len(),
            total_chunks = status.total_chunks,
            "Resuming upload"
        );
        Ok(job)
    }

    fn job(&self, path: &Path, upload_id: String, plan: Vec<ChunkRange>) -> UploadJob {
        let scheduler = ChunkScheduler::new(
            Arc::clone(&self.api),
            Arc::new(FileSource::new(path)),
            upload_id,
            plan,
            self.config.clone(),
        );
        UploadJob {
            api: Arc::clone(&self.api),
            scheduler,
        }
    }
}

/// One session's transfer in progress.
pub struct UploadJob {
    api: Arc<dyn UploadApi>,
    scheduler: ChunkScheduler,
}

impl UploadJob {
    pub fn upload_id(&self) -> &str {
        self.scheduler.upload_id()
    }

    pub fn scheduler(&self) -> &ChunkScheduler {
        &self.scheduler
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        self.scheduler.snapshot()
    }

    /// Sends every chunk still pending.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), TransferError> {
        self.scheduler.run(cancel).await
    }

    /// Sends only the chunks that failed in an earlier run.
    pub async fn retry_failed(&self, cancel: &CancellationToken) -> Result<(), TransferError> {
        self.scheduler.retry_failed_chunks(cancel).await
    }

    pub async fn complete(&self) -> Result<CompleteUploadResponse, TransferError> {
        let resp = self.api.complete_upload(self.upload_id()).await?;
        info!(
            upload_id = %self.upload_id(),
            artifact = %resp.artifact_path,
            "Upload completed"
        );
        Ok(resp)
    }

    /// [`run`](Self::run) then [`complete`](Self::complete).
    pub async fn finish(
        &self,
        cancel: &CancellationToken,
    ) -> Result<CompleteUploadResponse, TransferError> {
        self.run(cancel).await?;
        self.complete().await
    }
}

fn file_name(path: &Path) -> Result<String, TransferError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| TransferError::InvalidPath(path.display().to_string()))
}

fn plan(total_size: u64, chunk_size: u64, expected: u32) -> Result<Vec<ChunkRange>, TransferError> {
    let plan: Vec<ChunkRange> = split(total_size, chunk_size)?.collect();
    if plan.len() != expected as usize {
        return Err(TransferError::PlanMismatch {
            expected,
            got: plan.len() as u32,
        });
    }
    Ok(plan)
}
