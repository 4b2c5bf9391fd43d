//! Session registry: creation, lookup, status and eviction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use chunkup_protocol::messages::{CompleteUploadResponse, UploadStatusResponse};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::atomic::write_atomic;
use crate::error::UploadError;
use crate::session::{UploadSession, chunk_count};
use crate::store::ChunkStore;
use crate::validation::validate_file_name;

/// Registry entry: session state plus the locks serializing its completion
/// and its metadata writes.
pub(crate) struct SessionEntry {
    session: Mutex<UploadSession>,
    pub(crate) completion: tokio::sync::Mutex<()>,
    /// Held from snapshot to rename, so the file on disk never goes back to
    /// an older state.
    persist: tokio::sync::Mutex<()>,
}

impl SessionEntry {
    fn new(session: UploadSession) -> Arc<Self> {
        Arc::new(Self {
            session: Mutex::new(session),
            completion: tokio::sync::Mutex::new(()),
            persist: tokio::sync::Mutex::new(()),
        })
    }

    pub(crate) fn snapshot(&self) -> UploadSession {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update<R>(&self, f: impl FnOnce(&mut UploadSession) -> R) -> R {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut session)
    }
}

/// What a single eviction sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub sessions: usize,
    pub orphans: usize,
}

/// Owns every upload session known to this process.
///
/// Session metadata is persisted as `<sessions_dir>/<id>.json`, so a freshly
/// opened registry picks up where a previous process stopped. The map lock
/// is never held across an `.await`.
pub struct SessionRegistry {
    store: Arc<dyn ChunkStore>,
    sessions_dir: PathBuf,
    ttl: TimeDelta,
    entries: RwLock<HashMap<String, Arc<SessionEntry>>>,
}

impl SessionRegistry {
    /// Opens the registry, reloading every persisted session.
    pub async fn open(
        store: Arc<dyn ChunkStore>,
        sessions_dir: impl Into<PathBuf>,
        ttl: Duration,
    ) -> Result<Self, UploadError> {
        let sessions_dir = sessions_dir.into();
        tokio::fs::create_dir_all(&sessions_dir).await?;

        let mut entries = HashMap::new();
        let mut dir = tokio::fs::read_dir(&sessions_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if !is_metadata_file(&path) {
                continue;
            }
            match load_session(&path).await {
                Ok(session) => {
                    entries.insert(session.id.clone(), SessionEntry::new(session));
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable session"),
            }
        }

        info!(
            count = entries.len(),
            dir = %sessions_dir.display(),
            "session registry opened"
        );

        Ok(Self {
            store,
            sessions_dir,
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            entries: RwLock::new(entries),
        })
    }

    /// Creates and persists a new session.
    pub async fn init(
        &self,
        filename: &str,
        total_size: u64,
        chunk_size: u64,
        checksum: Option<&str>,
    ) -> Result<UploadSession, UploadError> {
        validate_file_name(filename)?;
        let total_chunks = chunk_count(total_size, chunk_size)?;
        let checksum = checksum.map(normalize_checksum).transpose()?;

        let now = Utc::now();
        let session = UploadSession {
            id: Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            total_size,
            chunk_size,
            total_chunks,
            checksum,
            created_at: now,
            updated_at: now,
            completed_at: None,
            result: None,
        };

        self.persist(&session).await?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id.clone(), SessionEntry::new(session.clone()));

        info!(
            upload_id = %session.id,
            filename,
            total_size,
            total_chunks,
            "upload session created"
        );
        Ok(session)
    }

    /// Returns a copy of the session.
    pub fn get(&self, upload_id: &str) -> Result<UploadSession, UploadError> {
        Ok(self.entry(upload_id)?.snapshot())
    }

    /// Number of sessions currently held.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reports received chunks, always recomputed from the chunk store.
    pub async fn status(&self, upload_id: &str) -> Result<UploadStatusResponse, UploadError> {
        let session = self.get(upload_id)?;

        // Chunks are deleted once reassembled.
        if session.is_completed() {
            return Ok(UploadStatusResponse {
                upload_id: session.id,
                chunk_size: session.chunk_size,
                total_chunks: session.total_chunks,
                received_chunks: (0..session.total_chunks).collect(),
                is_complete: true,
            });
        }

        let received: Vec<u32> = self
            .store
            .list(upload_id)
            .await?
            .into_iter()
            .filter(|&i| i < session.total_chunks)
            .collect();
        let is_complete = received.len() == session.total_chunks as usize;

        Ok(UploadStatusResponse {
            upload_id: session.id,
            chunk_size: session.chunk_size,
            total_chunks: session.total_chunks,
            received_chunks: received,
            is_complete,
        })
    }

    /// Validates an incoming chunk before it is stored.
    pub fn check_chunk(
        &self,
        upload_id: &str,
        index: u32,
        total_chunks: u32,
        len: u64,
    ) -> Result<(), UploadError> {
        let session = self.get(upload_id)?;

        if session.is_completed() {
            return Err(UploadError::Conflict(format!(
                "upload {upload_id} is already complete"
            )));
        }
        if index >= session.total_chunks {
            return Err(UploadError::IndexOutOfRange {
                index,
                total: session.total_chunks,
            });
        }
        if total_chunks != session.total_chunks {
            return Err(UploadError::InvalidArgument(format!(
                "totalChunks {total_chunks} does not match session ({})",
                session.total_chunks
            )));
        }
        let expected = session.expected_chunk_len(index);
        if len != expected {
            return Err(UploadError::InvalidArgument(format!(
                "chunk {index} must be {expected} bytes, got {len}"
            )));
        }
        Ok(())
    }

    /// Records that a chunk was durably stored and refreshes `updated_at`.
    pub async fn record_chunk_accepted(
        &self,
        upload_id: &str,
        index: u32,
    ) -> Result<(), UploadError> {
        let entry = self.entry(upload_id)?;
        let completed = entry.update(|s| {
            if index >= s.total_chunks {
                return Err(UploadError::IndexOutOfRange {
                    index,
                    total: s.total_chunks,
                });
            }
            if s.is_completed() {
                return Ok(true);
            }
            s.updated_at = Utc::now();
            Ok(false)
        })?;
        if completed {
            // A late duplicate; the completed record is final.
            debug!(upload_id, index, "chunk accepted after completion, metadata unchanged");
            return Ok(());
        }
        self.persist_entry(&entry).await
    }

    /// Caches the completion result and marks the session completed.
    ///
    /// The in-memory cache is set even if persisting fails.
    pub(crate) async fn finish(
        &self,
        entry: &SessionEntry,
        result: CompleteUploadResponse,
    ) -> Result<(), UploadError> {
        entry.update(|s| {
            let now = Utc::now();
            s.updated_at = now;
            s.completed_at = Some(now);
            s.result = Some(result);
        });
        self.persist_entry(entry).await
    }

    /// Removes sessions idle for longer than the TTL, plus chunk directories
    /// that belong to no session.
    ///
    /// Artifacts already written to the completed directory are kept.
    pub async fn evict_expired(&self, now: DateTime<Utc>) -> Result<EvictionReport, UploadError> {
        let cutoff = now
            .checked_sub_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let expired: Vec<(String, Arc<SessionEntry>)> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, e)| e.snapshot().last_activity() < cutoff)
            .map(|(id, e)| (id.clone(), Arc::clone(e)))
            .collect();

        let mut report = EvictionReport::default();
        for (id, entry) in expired {
            // Skip sessions that are being completed right now.
            let Ok(_guard) = entry.completion.try_lock() else {
                debug!(upload_id = %id, "eviction skipped, completion in progress");
                continue;
            };
            self.entries
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);

            if let Err(e) = self.store.delete(&id).await {
                warn!(upload_id = %id, error = %e, "failed to delete chunks of evicted session");
            }
            let path = self.metadata_path(&id);
            if let Err(e) = tokio::fs::remove_file(&path).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(upload_id = %id, error = %e, "failed to delete session metadata");
            }
            info!(upload_id = %id, "session evicted");
            report.sessions += 1;
        }

        for id in self.store.sessions().await? {
            if self.entry(&id).is_ok() {
                continue;
            }
            match self.store.delete(&id).await {
                Ok(()) => {
                    info!(upload_id = %id, "orphaned chunks removed");
                    report.orphans += 1;
                }
                Err(e) => warn!(upload_id = %id, error = %e, "failed to delete orphaned chunks"),
            }
        }

        Ok(report)
    }

    pub(crate) fn entry(&self, upload_id: &str) -> Result<Arc<SessionEntry>, UploadError> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(upload_id)
            .cloned()
            .ok_or_else(|| UploadError::session_not_found(upload_id))
    }

    fn metadata_path(&self, upload_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{upload_id}.json"))
    }

    /// Writes the entry's current state. The snapshot is taken under the
    /// persist lock, so the last write always carries the newest state.
    async fn persist_entry(&self, entry: &SessionEntry) -> Result<(), UploadError> {
        let _guard = entry.persist.lock().await;
        let session = entry.snapshot();
        self.persist(&session).await
    }

    async fn persist(&self, session: &UploadSession) -> Result<(), UploadError> {
        let json = serde_json::to_vec_pretty(session)?;
        write_atomic(&self.metadata_path(&session.id), &json).await?;
        Ok(())
    }
}

fn is_metadata_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .is_some_and(|n| n.to_string_lossy().starts_with('.'));
    !hidden && path.extension().is_some_and(|ext| ext == "json")
}

async fn load_session(path: &Path) -> Result<UploadSession, UploadError> {
    let data = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&data)?)
}

/// Lowercases a client checksum and checks it is a SHA-256 hex digest.
fn normalize_checksum(checksum: &str) -> Result<String, UploadError> {
    let normalized = checksum.trim().to_ascii_lowercase();
    if normalized.len() != 64 || !normalized.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(UploadError::InvalidArgument(format!(
            "checksum must be a SHA-256 hex digest, got {checksum:?}"
        )));
    }
    Ok(normalized)
}
