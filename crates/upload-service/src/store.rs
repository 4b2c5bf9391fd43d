//! Durable chunk persistence.
//!
//! Every chunk is keyed by `(upload_id, index)`. The set of stored indices
//! is the only record of what has been received.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::atomic::{TEMP_SUFFIX, temp_path_for};
use crate::error::UploadError;
use crate::validation::validate_file_name;

/// Boxed future returned by the object-safe storage traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const CHUNK_EXT: &str = "chunk";

/// Outcome of a successful [`ChunkStore::store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// The bytes were written by this call.
    Written,
    /// An identical-length chunk was already stored; nothing was rewritten.
    AlreadyPresent,
}

/// Durable, idempotent chunk storage.
pub trait ChunkStore: Send + Sync {
    /// Atomically stores one chunk.
    ///
    /// Storing a chunk of the same length again is a no-op; a different
    /// length fails with [`UploadError::Conflict`].
    fn store<'a>(
        &'a self,
        upload_id: &'a str,
        index: u32,
        data: &'a [u8],
    ) -> BoxFuture<'a, Result<Ack, UploadError>>;

    /// Reads one chunk.
    fn get<'a>(&'a self, upload_id: &'a str, index: u32)
    -> BoxFuture<'a, Result<Vec<u8>, UploadError>>;

    /// Stored length of one chunk, without reading it.
    fn chunk_len<'a>(
        &'a self,
        upload_id: &'a str,
        index: u32,
    ) -> BoxFuture<'a, Result<u64, UploadError>>;

    /// Sorted indices of every stored chunk. Empty for unknown sessions.
    fn list<'a>(&'a self, upload_id: &'a str) -> BoxFuture<'a, Result<Vec<u32>, UploadError>>;

    /// Removes every chunk of a session. Missing sessions are not an error.
    fn delete<'a>(&'a self, upload_id: &'a str) -> BoxFuture<'a, Result<(), UploadError>>;

    /// Ids of every session that currently has chunk storage.
    fn sessions(&self) -> BoxFuture<'_, Result<Vec<String>, UploadError>>;
}

// ---------------------------------------------------------------------------
// FsChunkStore
// ---------------------------------------------------------------------------

/// Filesystem-backed [`ChunkStore`].
///
/// Layout: `<root>/<upload_id>/<index>.chunk`. In-flight writes live next to
/// their target under a unique hidden temp name and are never listed.
#[derive(Debug, Clone)]
pub struct FsChunkStore {
    root: PathBuf,
}

impl FsChunkStore {
    /// Creates a store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, UploadError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, upload_id: &str) -> Result<PathBuf, UploadError> {
        validate_file_name(upload_id)?;
        Ok(self.root.join(upload_id))
    }

    fn chunk_path(&self, upload_id: &str, index: u32) -> Result<PathBuf, UploadError> {
        Ok(self
            .session_dir(upload_id)?
            .join(format!("{index}.{CHUNK_EXT}")))
    }

    async fn store_inner(
        &self,
        upload_id: &str,
        index: u32,
        data: &[u8],
    ) -> Result<Ack, UploadError> {
        let path = self.chunk_path(upload_id, index)?;

        if let Some(existing) = existing_len(&path).await? {
            return check_existing(upload_id, index, existing, data.len() as u64);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp = temp_path_for(&path);
        let written = async {
            let mut file = tokio::fs::File::create(&temp).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            Ok::<_, std::io::Error>(())
        }
        .await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        // Linking never replaces an existing file, so the first writer of an
        // index wins and later ones are checked against it.
        let linked = tokio::fs::hard_link(&temp, &path).await;
        let _ = tokio::fs::remove_file(&temp).await;
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let existing = tokio::fs::metadata(&path).await?.len();
                return check_existing(upload_id, index, existing, data.len() as u64);
            }
            Err(e) => return Err(e.into()),
        }

        debug!(upload_id, index, size = data.len(), "chunk stored");
        Ok(Ack::Written)
    }

    async fn list_inner(&self, upload_id: &str) -> Result<Vec<u32>, UploadError> {
        let dir = self.session_dir(upload_id)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut indices = BTreeSet::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(index) = parse_chunk_name(&name.to_string_lossy()) {
                indices.insert(index);
            }
        }
        Ok(indices.into_iter().collect())
    }

    async fn sessions_inner(&self) -> Result<Vec<String>, UploadError> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl ChunkStore for FsChunkStore {
    fn store<'a>(
        &'a self,
        upload_id: &'a str,
        index: u32,
        data: &'a [u8],
    ) -> BoxFuture<'a, Result<Ack, UploadError>> {
        Box::pin(self.store_inner(upload_id, index, data))
    }

    fn get<'a>(
        &'a self,
        upload_id: &'a str,
        index: u32,
    ) -> BoxFuture<'a, Result<Vec<u8>, UploadError>> {
        Box::pin(async move {
            let path = self.chunk_path(upload_id, index)?;
            tokio::fs::read(&path)
                .await
                .map_err(|e| not_found_or_io(e, upload_id, index))
        })
    }

    fn chunk_len<'a>(
        &'a self,
        upload_id: &'a str,
        index: u32,
    ) -> BoxFuture<'a, Result<u64, UploadError>> {
        Box::pin(async move {
            let path = self.chunk_path(upload_id, index)?;
            existing_len(&path)
                .await?
                .ok_or_else(|| UploadError::NotFound(format!("chunk {index} of {upload_id}")))
        })
    }

    fn list<'a>(&'a self, upload_id: &'a str) -> BoxFuture<'a, Result<Vec<u32>, UploadError>> {
        Box::pin(self.list_inner(upload_id))
    }

    fn delete<'a>(&'a self, upload_id: &'a str) -> BoxFuture<'a, Result<(), UploadError>> {
        Box::pin(async move {
            let dir = self.session_dir(upload_id)?;
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    debug!(upload_id, "chunk storage removed");
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn sessions(&self) -> BoxFuture<'_, Result<Vec<String>, UploadError>> {
        Box::pin(self.sessions_inner())
    }
}

async fn existing_len(path: &Path) -> Result<Option<u64>, UploadError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn check_existing(
    upload_id: &str,
    index: u32,
    existing: u64,
    incoming: u64,
) -> Result<Ack, UploadError> {
    if existing == incoming {
        debug!(upload_id, index, "chunk already present");
        Ok(Ack::AlreadyPresent)
    } else {
        Err(UploadError::Conflict(format!(
            "chunk {index} of {upload_id} already stored with {existing} bytes, got {incoming}"
        )))
    }
}

fn not_found_or_io(e: std::io::Error, upload_id: &str, index: u32) -> UploadError {
    if e.kind() == std::io::ErrorKind::NotFound {
        UploadError::NotFound(format!("chunk {index} of {upload_id}"))
    } else {
        UploadError::StorageIo(e)
    }
}

/// Parses `<index>.chunk`, ignoring temp files and anything else.
fn parse_chunk_name(name: &str) -> Option<u32> {
    if name.starts_with('.') || name.ends_with(TEMP_SUFFIX) {
        return None;
    }
    let stem = name.strip_suffix(CHUNK_EXT)?.strip_suffix('.')?;
    stem.parse().ok()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, FsChunkStore) {
        let tmp = TempDir::new().unwrap();
        let store = FsChunkStore::open(tmp.path().join("uploads")).await.unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn store_and_get() {
        let (_tmp, store) = store().await;
        let ack = store.store("u1", 0, b"hello").await.unwrap();
        assert_eq!(ack, Ack::Written);
        assert_eq!(store.get("u1", 0).await.unwrap(), b"hello");
        assert_eq!(store.chunk_len("u1", 0).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn store_is_idempotent() {
        let (_tmp, store) = store().await;
        store.store("u1", 2, b"abc").await.unwrap();
        let ack = store.store("u1", 2, b"abc").await.unwrap();
        assert_eq!(ack, Ack::AlreadyPresent);
        assert_eq!(store.list("u1").await.unwrap(), vec![2]);
        assert_eq!(store.get("u1", 2).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn different_length_conflicts() {
        let (_tmp, store) = store().await;
        store.store("u1", 0, b"abc").await.unwrap();
        let err = store.store("u1", 0, b"abcd").await.unwrap_err();
        assert!(matches!(err, UploadError::Conflict(_)));
        assert_eq!(store.get("u1", 0).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn get_missing_chunk() {
        let (_tmp, store) = store().await;
        assert!(matches!(
            store.get("u1", 0).await,
            Err(UploadError::NotFound(_))
        ));
        assert!(matches!(
            store.chunk_len("u1", 0).await,
            Err(UploadError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_is_sorted_and_skips_temp_files() {
        let (_tmp, store) = store().await;
        for index in [4, 0, 2, 10] {
            store.store("u1", index, b"x").await.unwrap();
        }
        let dir = store.root().join("u1");
        std::fs::write(dir.join(".3.chunk.abcd.tmp"), b"partial").unwrap();
        std::fs::write(dir.join("notes.txt"), b"junk").unwrap();

        assert_eq!(store.list("u1").await.unwrap(), vec![0, 2, 4, 10]);
    }

    #[tokio::test]
    async fn list_unknown_session_is_empty() {
        let (_tmp, store) = store().await;
        assert!(store.list("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_tmp, store) = store().await;
        store.store("u1", 0, b"x").await.unwrap();
        store.delete("u1").await.unwrap();
        store.delete("u1").await.unwrap();
        assert!(store.list("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_unsafe_upload_id() {
        let (_tmp, store) = store().await;
        assert!(matches!(
            store.store("../escape", 0, b"x").await,
            Err(UploadError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn sessions_lists_chunk_dirs() {
        let (_tmp, store) = store().await;
        store.store("b", 0, b"x").await.unwrap();
        store.store("a", 0, b"x").await.unwrap();
        assert_eq!(store.sessions().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn concurrent_disjoint_indices() {
        let (_tmp, store) = store().await;
        let store = Arc::new(store);
        let mut handles = Vec::new();
        for index in 0..32u32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let data = vec![index as u8; 64];
                store.store("u1", index, &data).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let listed = store.list("u1").await.unwrap();
        assert_eq!(listed, (0..32).collect::<Vec<_>>());
        for index in 0..32u32 {
            assert_eq!(store.get("u1", index).await.unwrap(), vec![index as u8; 64]);
        }
    }

    #[tokio::test]
    async fn concurrent_same_index() {
        let (_tmp, store) = store().await;
        let store = Arc::new(store);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.store("u1", 7, &[9u8; 128]).await.unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.list("u1").await.unwrap(), vec![7]);
        assert_eq!(store.get("u1", 7).await.unwrap(), vec![9u8; 128]);

        let leftovers: Vec<_> = std::fs::read_dir(store.root().join("u1"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_different_lengths_never_overwrite() {
        let (_tmp, store) = store().await;
        let store = Arc::new(store);

        for index in 0..32u32 {
            let short = {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.store("u1", index, b"abc").await })
            };
            let long = {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.store("u1", index, b"wxyz").await })
            };
            let short = short.await.unwrap();
            let long = long.await.unwrap();

            let stored = store.get("u1", index).await.unwrap();
            match (short, long) {
                (Ok(Ack::Written), Err(UploadError::Conflict(_))) => assert_eq!(stored, b"abc"),
                (Err(UploadError::Conflict(_)), Ok(Ack::Written)) => assert_eq!(stored, b"wxyz"),
                other => panic!("index {index}: expected one write and one conflict, got {other:?}"),
            }
        }
        assert_eq!(store.list("u1").await.unwrap(), (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn parses_chunk_names() {
        assert_eq!(parse_chunk_name("12.chunk"), Some(12));
        assert_eq!(parse_chunk_name(".12.chunk.x.tmp"), None);
        assert_eq!(parse_chunk_name("12chunk"), None);
        assert_eq!(parse_chunk_name("abc.chunk"), None);
    }
}
