//! Write-to-temp-then-rename helpers.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Suffix shared by every temporary file this crate creates.
pub(crate) const TEMP_SUFFIX: &str = ".tmp";

/// Returns a unique sibling temp path for `path`.
///
/// Two writers targeting the same `path` never share a temp name.
pub(crate) fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}{TEMP_SUFFIX}", Uuid::new_v4()))
}

/// Atomically replaces `path` with `data`.
///
/// The bytes are written and fsynced to a unique temp file, then renamed
/// over `path`. Readers see either the old content or the new one.
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let temp = temp_path_for(path);
    let result = async {
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&temp).await;
    }
    result
}
