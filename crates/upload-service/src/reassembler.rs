//! Completion: verify, concatenate, publish, notify, clean up.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use chunkup_protocol::messages::{CompleteUploadResponse, FileMetadata};
use chunkup_protocol::types::FileType;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::atomic::temp_path_for;
use crate::error::UploadError;
use crate::hooks::{ArtifactInfo, Hooks};
use crate::registry::SessionRegistry;
use crate::session::UploadSession;
use crate::store::ChunkStore;

/// Number of upload-id characters used to disambiguate a colliding name.
const COLLISION_ID_PREFIX: usize = 8;

/// Turns a fully received session into a final artifact, exactly once.
pub struct Reassembler {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn ChunkStore>,
    completed_dir: PathBuf,
    hooks: Hooks,
    /// Serializes choosing a destination name and renaming onto it.
    publish: tokio::sync::Mutex<()>,
}

impl Reassembler {
    pub fn new(
        registry: Arc<SessionRegistry>,
        store: Arc<dyn ChunkStore>,
        completed_dir: impl Into<PathBuf>,
        hooks: Hooks,
    ) -> Self {
        Self {
            registry,
            store,
            completed_dir: completed_dir.into(),
            hooks,
            publish: tokio::sync::Mutex::new(()),
        }
    }

    /// Completes an upload.
    ///
    /// Repeated or concurrent calls for the same session return the cached
    /// result of the first successful completion without touching chunk
    /// storage again.
    pub async fn complete(&self, upload_id: &str) -> Result<CompleteUploadResponse, UploadError> {
        let entry = self.registry.entry(upload_id)?;
        let _guard = entry.completion.lock().await;

        let session = entry.snapshot();
        if let Some(result) = &session.result {
            debug!(upload_id, "returning cached completion result");
            return Ok(result.clone());
        }

        let received = self.store.list(upload_id).await?;
        let missing = missing_indices(session.total_chunks, &received);
        if !missing.is_empty() {
            return Err(UploadError::IncompleteUpload { missing });
        }

        tokio::fs::create_dir_all(&self.completed_dir).await?;
        let staging = temp_path_for(&self.completed_dir.join(&session.filename));
        let checksum = match self.concatenate(&session, &staging).await {
            Ok(checksum) => checksum,
            Err(e) => {
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(e);
            }
        };

        if let Some(expected) = &session.checksum
            && *expected != checksum
        {
            let _ = tokio::fs::remove_file(&staging).await;
            warn!(upload_id, expected = %expected, actual = %checksum, "checksum mismatch");
            return Err(UploadError::ChecksumMismatch {
                expected: expected.clone(),
                actual: checksum,
            });
        }

        let artifact_path = match self.publish(&staging, &session).await {
            Ok(path) => path,
            Err(e) => {
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(e);
            }
        };

        let metadata = FileMetadata {
            upload_id: session.id.clone(),
            filename: artifact_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| session.filename.clone()),
            size: session.total_size,
            checksum,
            file_type: FileType::from_filename(&session.filename),
            timestamp: Utc::now().to_rfc3339(),
        };
        info!(
            upload_id,
            path = %artifact_path.display(),
            size = metadata.size,
            "artifact reassembled"
        );

        let artifact = ArtifactInfo {
            path: artifact_path.clone(),
            metadata: metadata.clone(),
        };
        let (hooks, downstream_job_id) = self.hooks.run(&artifact).await;

        let result = CompleteUploadResponse {
            success: true,
            artifact_path: artifact_path.display().to_string(),
            metadata,
            downstream_job_id,
            hooks,
        };

        // Chunks are only dropped once the result is durable; otherwise a
        // restart would find neither.
        match self.registry.finish(&entry, result.clone()).await {
            Ok(()) => {
                if let Err(e) = self.store.delete(upload_id).await {
                    warn!(upload_id, error = %e, "failed to delete chunks after completion");
                }
            }
            Err(e) => {
                warn!(upload_id, error = %e, "failed to persist completion, keeping chunks");
            }
        }

        Ok(result)
    }

    /// Streams chunks in index order into `staging`, returning the SHA-256.
    async fn concatenate(
        &self,
        session: &UploadSession,
        staging: &Path,
    ) -> Result<String, UploadError> {
        let mut file = tokio::fs::File::create(staging).await?;
        let mut hasher = Sha256::new();
        let mut written: u64 = 0;

        for index in 0..session.total_chunks {
            let data = self.store.get(&session.id, index).await?;
            written += data.len() as u64;
            if written > session.total_size {
                return Err(size_mismatch(session, written));
            }
            hasher.update(&data);
            file.write_all(&data).await?;
        }

        if written != session.total_size {
            return Err(size_mismatch(session, written));
        }

        file.sync_all().await?;
        Ok(hex::encode(hasher.finalize()))
    }

    /// Renames `staging` to a destination that does not exist yet.
    async fn publish(&self, staging: &Path, session: &UploadSession) -> Result<PathBuf, UploadError> {
        let _guard = self.publish.lock().await;

        let mut attempt = 0u32;
        loop {
            let name = candidate_name(&session.filename, &session.id, attempt);
            let dest = self.completed_dir.join(&name);
            if !tokio::fs::try_exists(&dest).await? {
                tokio::fs::rename(staging, &dest).await?;
                if attempt > 0 {
                    info!(
                        upload_id = %session.id,
                        requested = %session.filename,
                        stored = %name,
                        "destination existed, artifact renamed"
                    );
                }
                return Ok(dest);
            }
            attempt += 1;
        }
    }
}

fn size_mismatch(session: &UploadSession, written: u64) -> UploadError {
    UploadError::StorageIo(std::io::Error::other(format!(
        "chunks of {} sum to at least {written} bytes, expected {}",
        session.id, session.total_size
    )))
}

/// Indices in `[0, total)` absent from the sorted `received` list.
fn missing_indices(total: u32, received: &[u32]) -> Vec<u32> {
    (0..total)
        .filter(|i| received.binary_search(i).is_err())
        .collect()
}

/// Destination name for the `attempt`-th try.
///
/// `report.csv`, then `report-1a2b3c4d.csv`, then `report-1a2b3c4d-2.csv`, ...
fn candidate_name(filename: &str, upload_id: &str, attempt: u32) -> String {
    if attempt == 0 {
        return filename.to_string();
    }

    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    let short_id: String = upload_id.chars().take(COLLISION_ID_PREFIX).collect();

    let base = if attempt == 1 {
        format!("{stem}-{short_id}")
    } else {
        format!("{stem}-{short_id}-{attempt}")
    };
    match ext {
        Some(ext) => format!("{base}.{ext}"),
        None => base,
    }
}
